//! MFSK symbol codec: waveform synthesis and FFT-based symbol recovery.
//!
//! A symbol is a 10-bit value. Bit `i` selects whether tone `i` of [`TONE_FREQUENCIES`] is
//! present in the 256-sample waveform used to transmit that symbol.

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

/// Audio sample rate used throughout the modem.
pub const SAMPLE_RATE: u32 = 44100;

/// Size of the FFT used to derive the tone grid and to decode a symbol window.
pub const FFT_N: usize = 64;

/// Number of tone bits carried by one symbol.
pub const TONE_COUNT: usize = 10;

/// Number of audio samples used to transmit one symbol.
pub const SAMPLES_PER_SYMBOL: usize = 256;

/// The ten tone frequencies, bins `4, 7, 10, ..., 31` of a 64-point FFT at [`SAMPLE_RATE`].
pub fn tone_frequencies() -> [f32; TONE_COUNT] {
    let mut freqs = [0f32; TONE_COUNT];
    for (i, freq) in freqs.iter_mut().enumerate() {
        *freq = (SAMPLE_RATE as f32 / FFT_N as f32) * (4 + 3 * i) as f32;
    }
    freqs
}

fn tone_bin_indices() -> [usize; TONE_COUNT] {
    let mut bins = [0usize; TONE_COUNT];
    for (i, bin) in bins.iter_mut().enumerate() {
        *bin = 4 + 3 * i;
    }
    bins
}

/// Continuous-phase synthesizer for symbol waveforms.
///
/// Keeps the synthesis time cursor across calls so that successive symbols (and successive
/// frames) join without a phase discontinuity. The cursor is reduced modulo one second after
/// each symbol, since all tone frequencies are integer multiples of `SAMPLE_RATE / FFT_N` and
/// therefore repeat with a period of at most one second.
pub struct SymbolSynth {
    t: f32,
}

impl SymbolSynth {
    pub fn new() -> Self {
        Self { t: 0.0 }
    }

    /// Synthesize the 256 samples for `symbol`, advancing the phase cursor.
    pub fn encode_symbol(&mut self, symbol: u16) -> [i16; SAMPLES_PER_SYMBOL] {
        let freqs = tone_frequencies();
        let t_step = 1.0 / SAMPLE_RATE as f32;
        let mut waveform = [0f32; SAMPLES_PER_SYMBOL];
        let mut any_tone = false;
        for (i, freq) in freqs.iter().enumerate() {
            if symbol & (1 << i) == 0 {
                continue;
            }
            any_tone = true;
            for (n, sample) in waveform.iter_mut().enumerate() {
                let t = self.t + n as f32 * t_step;
                *sample += (2.0 * std::f32::consts::PI * freq * t).sin();
            }
        }
        self.t += SAMPLES_PER_SYMBOL as f32 * t_step;
        self.t %= 1.0;

        let mut out = [0i16; SAMPLES_PER_SYMBOL];
        if any_tone {
            let peak = waveform
                .iter()
                .fold(0f32, |acc, s| acc.max(s.abs()))
                .max(f32::EPSILON);
            for (o, s) in out.iter_mut().zip(waveform.iter()) {
                *o = ((s / peak) * 0x3FFF as f32) as i16;
            }
        }
        out
    }
}

impl Default for SymbolSynth {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a 64-point real FFT over `samples` and return the magnitudes at the ten tone bins.
///
/// `samples` must contain exactly [`FFT_N`] values.
pub fn decode_window(samples: &[i16]) -> [f32; TONE_COUNT] {
    debug_assert_eq!(samples.len(), FFT_N);
    let mut buf: Vec<Complex32> = samples.iter().map(|s| Complex32::new(*s as f32, 0.0)).collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FFT_N);
    fft.process(&mut buf);

    let bins = tone_bin_indices();
    let mut magnitudes = [0f32; TONE_COUNT];
    for (m, bin) in magnitudes.iter_mut().zip(bins.iter()) {
        *m = buf[*bin].norm();
    }
    magnitudes
}

/// Threshold ten tone magnitudes into a 10-bit symbol.
///
/// Relies on every defined symbol having at least one tone bit clear, so `m_min` sits near the
/// noise floor rather than near `m_max`.
pub fn window_to_symbol(magnitudes: &[f32; TONE_COUNT]) -> u16 {
    let m_min = magnitudes.iter().cloned().fold(f32::INFINITY, f32::min);
    let m_max = magnitudes.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let threshold = m_min + (m_max - m_min) / 5.0;
    let mut symbol = 0u16;
    for (i, m) in magnitudes.iter().enumerate() {
        if *m > threshold {
            symbol |= 1 << i;
        }
    }
    symbol
}

/// Magnitude spread (`max - min`) for a 64-sample window, used for sub-symbol alignment search.
pub fn window_spread(samples: &[i16]) -> f32 {
    let magnitudes = decode_window(samples);
    let m_min = magnitudes.iter().cloned().fold(f32::INFINITY, f32::min);
    let m_max = magnitudes.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    m_max - m_min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_match_fft_grid() {
        let freqs = tone_frequencies();
        assert_eq!(freqs[0], 4.0 * (SAMPLE_RATE as f32 / FFT_N as f32));
        assert_eq!(freqs[9], 31.0 * (SAMPLE_RATE as f32 / FFT_N as f32));
    }

    #[test]
    fn silence_symbol_is_zero_samples() {
        let mut synth = SymbolSynth::new();
        let samples = synth.encode_symbol(0);
        assert!(samples.iter().all(|s| *s == 0));
    }

    #[test]
    fn single_tone_roundtrips_through_fft() {
        let mut synth = SymbolSynth::new();
        // bit 3 set, all control bits clear - one tone on, rest off
        let symbol = 1u16 << 3;
        let samples = synth.encode_symbol(symbol);
        let magnitudes = decode_window(&samples[0..FFT_N]);
        let decoded = window_to_symbol(&magnitudes);
        assert_eq!(decoded, symbol);
    }

    #[test]
    fn every_payload_symbol_has_a_clear_tone_bit() {
        // the thresholding in window_to_symbol depends on this invariant
        for byte in 0u16..=255 {
            for ctrl in [0u16, 1u16] {
                let symbol = (ctrl << 9) | (byte << 1) | (1 - ctrl);
                assert_ne!(symbol & 0x3FF, 0x3FF, "symbol {symbol:#x} has every tone set");
            }
        }
    }

    #[test]
    fn phase_is_continuous_across_symbols() {
        let mut synth = SymbolSynth::new();
        let first = synth.encode_symbol(0b11_1111_1111);
        let second = synth.encode_symbol(0b11_1111_1111);
        // the synthesized waveform for the last sample of `first` and the first of `second`
        // should differ by roughly one sample step, not jump as if phase had reset to zero
        let last = *first.last().unwrap() as f32;
        let next = second[0] as f32;
        assert!((next - last).abs() < 0x3FFF as f32);
    }
}
