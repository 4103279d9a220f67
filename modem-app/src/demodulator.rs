//! Demodulator worker loop: reads samples from the capture device, feeds them through
//! the recovery state machine, and forwards recovered datagrams to the inbound sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::audio::CaptureSource;
use crate::error::AppError;
use crate::packet_io::PacketSink;

/// Run the demodulator loop until `shutdown` is set.
///
/// Capture reads are the only blocking point; a set shutdown flag is honored as soon as
/// the in-flight read returns, which is one audio-read quantum per §5.
pub fn run(
    mut source: impl CaptureSource,
    mut sink: impl PacketSink,
    shutdown: Arc<AtomicBool>,
) -> Result<(), AppError> {
    let mut demod = modem_core::Demodulator::new();
    info!("demodulator started");

    while !shutdown.load(Ordering::Relaxed) {
        let samples = source.read(demod.pull_size())?;
        if let Some(payload) = demod.feed(&samples) {
            sink.send(&payload)?;
        }
    }

    info!("demodulator stopping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryCapture;
    use crate::packet_io::{loopback_pair, PacketSource};
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn delivers_one_frame_then_shuts_down() {
        let mut modulator = modem_core::Modulator::new();
        let calibration_noise: Vec<i16> = (0..2 * modem_core::SAMPLE_RATE as usize)
            .map(|i| if i % 2 == 0 { 16000 } else { -16000 })
            .collect();
        let mut samples = calibration_noise;
        samples.extend(modulator.encode_frame(b"hi").unwrap());
        samples.extend(std::iter::repeat(0i16).take(4096));

        let capture = MemoryCapture::new(samples);
        let (sink, mut out) = loopback_pair();

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_worker = shutdown.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            shutdown.store(true, Ordering::Relaxed);
        });

        run(capture, sink, shutdown_for_worker).unwrap();

        assert_eq!(
            out.recv_timeout(Duration::from_millis(10)).unwrap(),
            Some(b"hi".to_vec())
        );
    }
}
