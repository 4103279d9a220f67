//! Modulator and demodulator state machines built on top of the symbol and frame codecs.

use crate::frame::{
    decode_length, frame_samples, is_lead, is_size_high, is_size_low, is_valid_payload_symbol,
    FrameError, LEAD_A, LEAD_B, LEAD_COUNT, END_SYMBOL,
};
use crate::symbol::{decode_window, window_spread, window_to_symbol, SymbolSynth, FFT_N, SAMPLES_PER_SYMBOL, SAMPLE_RATE};
use log::{debug, info, warn};

/// Default number of samples the demodulator asks for on an ordinary iteration.
pub const DEFAULT_PULL: usize = 1024;

const SAFETY_MARGIN: usize = 32;
const MIN_CALIBRATION_SAMPLES: usize = 2 * SAMPLE_RATE as usize;
const MIN_AMP_RANGE: i32 = 5000;
const MIN_ALIGNMENT_SPREAD: f32 = 50000.0;
const ALIGNMENT_SEARCH: usize = SAMPLES_PER_SYMBOL - FFT_N;

/// Synthesizes frames onto a continuous, phase-coherent sample stream.
///
/// One instance should live for the lifetime of a transmitter so that phase is preserved
/// across frames, not just within one.
pub struct Modulator {
    synth: SymbolSynth,
}

impl Modulator {
    pub fn new() -> Self {
        Self {
            synth: SymbolSynth::new(),
        }
    }

    /// Encode `payload` (empty for a calibration ping) as a sample stream ready for playback.
    pub fn encode_frame(&mut self, payload: &[u8]) -> Result<Vec<i16>, FrameError> {
        frame_samples(payload, &mut self.synth)
    }
}

impl Default for Modulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Calibration parameters derived from ambient noise, once per session.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    amp_silence: i32,
}

enum Stage {
    /// Accumulating samples to determine the noise floor.
    NotCalibrated,
    /// Calibrated and hunting for frames.
    Active(Calibration),
}

/// Recovers datagrams from a continuous, unsynchronized stream of capture samples.
///
/// Call [`Demodulator::pull_size`] to learn how many samples to fetch next, feed them through
/// [`Demodulator::feed`], and check the return value for a recovered payload. Empty payloads
/// (calibration pings) are consumed internally and never returned.
pub struct Demodulator {
    stage: Stage,
    buffer: Vec<i16>,
    pull_size: usize,
}

impl Demodulator {
    pub fn new() -> Self {
        Self {
            stage: Stage::NotCalibrated,
            buffer: Vec::new(),
            pull_size: DEFAULT_PULL,
        }
    }

    /// Number of samples the caller should fetch before the next [`Demodulator::feed`] call.
    pub fn pull_size(&self) -> usize {
        self.pull_size
    }

    /// `true` once calibration has completed; calibration happens at most once per session.
    pub fn is_calibrated(&self) -> bool {
        matches!(self.stage, Stage::Active(_))
    }

    /// Feed newly captured samples in. Returns a decoded payload if one was recovered from this
    /// or a prior call's buffered data; calibration pings are silently consumed.
    pub fn feed(&mut self, samples: &[i16]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(samples);
        self.pull_size = DEFAULT_PULL;
        match self.stage {
            Stage::NotCalibrated => {
                self.try_calibrate();
                None
            }
            Stage::Active(cal) => self.recv_first(cal),
        }
    }

    fn try_calibrate(&mut self) {
        if self.buffer.len() < MIN_CALIBRATION_SAMPLES {
            return;
        }
        let amp_max = *self.buffer.iter().max().unwrap() as i32;
        let amp_min = *self.buffer.iter().min().unwrap() as i32;
        let range = amp_max - amp_min;
        if range < MIN_AMP_RANGE {
            warn!(
                "failed to calibrate, signal too weak ({:.2}%)",
                100.0 * range as f32 / 0x10000 as f32
            );
            self.buffer.clear();
            return;
        }
        let amp_zero = (amp_max + amp_min) / 2;
        let amp_silence = amp_zero + (range / 2) / 10;
        info!(
            "calibrated: diff={:.2}% zero(i16)={amp_zero} silence(i16)={amp_silence}",
            100.0 * range as f32 / 0x10000 as f32
        );
        self.buffer.clear();
        self.stage = Stage::Active(Calibration { amp_silence });
    }

    fn recv_first(&mut self, cal: Calibration) -> Option<Vec<u8>> {
        if !self.seek_signal(cal.amp_silence) {
            return None;
        }

        let min_len = (LEAD_COUNT + 2 + 1) * SAMPLES_PER_SYMBOL + FFT_N;
        if self.buffer.len() < min_len {
            return None;
        }

        let Some(offset) = self.align() else {
            self.keep_tail(SAFETY_MARGIN);
            return None;
        };

        let (symbols, last_i) = self.decode_symbol_stream(offset);

        let Some(lead_idx) = find_lead_index(&symbols) else {
            debug!("missing leads, skipping data");
            self.keep_tail(SAFETY_MARGIN);
            return None;
        };

        let mut idx = lead_idx;
        while idx < symbols.len() && is_lead(symbols[idx]) {
            idx += 1;
        }
        if idx >= symbols.len() {
            debug!("leads only, wait for more data");
            self.keep_tail(SAFETY_MARGIN + SAMPLES_PER_SYMBOL);
            return None;
        }
        if !is_size_low(symbols[idx]) {
            warn!("weird data found after leads");
            self.keep_tail(SAFETY_MARGIN);
            return None;
        }
        if idx + 1 >= symbols.len() {
            debug!("waiting for second size symbol");
            self.keep_tail(SAFETY_MARGIN + SAMPLES_PER_SYMBOL * 2);
            return None;
        }
        if !is_size_high(symbols[idx + 1]) {
            warn!("incorrect second size symbol");
            self.keep_tail(SAFETY_MARGIN);
            return None;
        }

        let length = decode_length(symbols[idx], symbols[idx + 1]);
        idx += 2;

        let available = symbols.len().saturating_sub(idx + 1);
        if available < length {
            let missing = length - available;
            self.pull_size = SAMPLES_PER_SYMBOL * missing + SAFETY_MARGIN;
            debug!("waiting for full packet, {missing} symbols short");
            return None;
        }

        for i in 0..length {
            if !is_valid_payload_symbol(i, symbols[idx + i]) {
                warn!("wrong payload control bit at position {i}");
                self.keep_tail(SAFETY_MARGIN);
                return None;
            }
        }

        if symbols[idx + length] != END_SYMBOL {
            warn!("wrong end symbol");
            self.keep_tail(SAFETY_MARGIN);
            return None;
        }

        let payload: Vec<u8> = (0..length)
            .map(|i| ((symbols[idx + i] >> 1) & 0xff) as u8)
            .collect();

        let drop = last_i.min(self.buffer.len());
        self.buffer.drain(0..drop);

        if payload.is_empty() {
            debug!("calibration ping received");
            None
        } else {
            info!("forwarding {} bytes of data", payload.len());
            Some(payload)
        }
    }

    /// Scan for the first non-silent sample; discard silence up to a small safety margin before
    /// it. Returns `false` if the buffer was entirely silence (already discarded).
    fn seek_signal(&mut self, amp_silence: i32) -> bool {
        match self.buffer.iter().position(|s| *s as i32 > amp_silence) {
            None => {
                self.keep_tail(SAFETY_MARGIN);
                false
            }
            Some(first) => {
                let start = first.saturating_sub(SAFETY_MARGIN);
                if start > 0 {
                    self.buffer.drain(0..start);
                }
                true
            }
        }
    }

    /// Search the first symbol's worth of samples for the offset with the strongest tone
    /// discrimination. Returns `None` if the best spread found is too weak to trust.
    fn align(&self) -> Option<usize> {
        let mut best_idx = 0;
        let mut best_spread = f32::NEG_INFINITY;
        for i in 0..ALIGNMENT_SEARCH {
            let spread = window_spread(&self.buffer[i..i + FFT_N]);
            if spread > best_spread {
                best_spread = spread;
                best_idx = i;
            }
        }
        if best_spread < MIN_ALIGNMENT_SPREAD {
            warn!("FM signal too weak, best_diff={best_spread}");
            return None;
        }
        debug!("FM signal best_diff={best_spread}, best_idx={best_idx}");
        Some(best_idx)
    }

    /// Decode one symbol per 256-sample step starting at `offset`, stopping at the end symbol
    /// or when the buffer runs out. Returns the decoded symbols and the sample cursor reached.
    fn decode_symbol_stream(&self, offset: usize) -> (Vec<u16>, usize) {
        let mut symbols = Vec::new();
        let mut idx = offset;
        while idx + FFT_N <= self.buffer.len() {
            let magnitudes = decode_window(&self.buffer[idx..idx + FFT_N]);
            let symbol = window_to_symbol(&magnitudes);
            idx += SAMPLES_PER_SYMBOL;
            symbols.push(symbol);
            if symbol == END_SYMBOL {
                break;
            }
        }
        debug!("received symbols {symbols:?}");
        (symbols, idx)
    }

    /// Keep only the trailing `n` samples of the buffer (or all of it, if shorter).
    fn keep_tail(&mut self, n: usize) {
        if self.buffer.len() > n {
            let drop = self.buffer.len() - n;
            self.buffer.drain(0..drop);
        }
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_lead_index(symbols: &[u16]) -> Option<usize> {
    symbols
        .iter()
        .position(|s| *s == LEAD_A)
        .or_else(|| symbols.iter().position(|s| *s == LEAD_B))
}
