//! Modulator worker loop: pulls datagrams from the outbound source and writes frames to
//! the playback device, falling back to a calibration ping when nothing is queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use modem_core::MAX_PAYLOAD_LEN;

use crate::audio::PlaybackSink;
use crate::error::AppError;
use crate::packet_io::PacketSource;

/// How long the worker waits for an outbound datagram before sending a calibration ping.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Run the modulator loop until `shutdown` is set or an unrecoverable error occurs.
///
/// On return with `Err`, the caller is expected to set `shutdown` so the rest of the
/// pipeline winds down too; per-packet oversize rejections are not fatal and do not
/// reach this return path.
pub fn run(
    mut source: impl PacketSource,
    mut sink: impl PlaybackSink,
    shutdown: Arc<AtomicBool>,
) -> Result<(), AppError> {
    let mut modulator = modem_core::Modulator::new();
    info!("modulator started");

    while !shutdown.load(Ordering::Relaxed) {
        let payload = match source.recv_timeout(POLL_TIMEOUT)? {
            Some(buf) if buf.len() > MAX_PAYLOAD_LEN => {
                warn!(
                    "dropping oversized outbound datagram: {} bytes > {} max",
                    buf.len(),
                    MAX_PAYLOAD_LEN
                );
                continue;
            }
            Some(buf) => buf,
            None => {
                debug!("nothing queued, sending calibration ping");
                Vec::new()
            }
        };

        let samples = modulator
            .encode_frame(&payload)
            .map_err(|e| AppError::PayloadTooLarge {
                provided: e_len(&e),
                capacity: MAX_PAYLOAD_LEN,
            })?;

        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        sink.write(&samples)?;
        sink.drain()?;
    }

    info!("modulator stopping");
    Ok(())
}

fn e_len(e: &modem_core::FrameError) -> usize {
    let modem_core::FrameError::PayloadTooLarge { len } = e;
    *len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_io::loopback_pair;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration as StdDuration;

    /// Playback sink that reports every write back through a shared counter, so the test
    /// can observe how many samples were sent without holding the sink itself hostage in
    /// the worker thread.
    struct CountingSink(Arc<Mutex<usize>>);

    impl PlaybackSink for CountingSink {
        fn write(&mut self, samples: &[i16]) -> Result<(), AppError> {
            *self.0.lock().unwrap() += samples.len();
            Ok(())
        }
        fn drain(&mut self) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[test]
    fn sends_queued_datagram_then_calibration_pings_until_shutdown() {
        let (mut tx, rx) = loopback_pair();
        tx.send(b"hi").unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_worker = shutdown.clone();
        thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(50));
            shutdown.store(true, Ordering::Relaxed);
        });

        let total_samples = Arc::new(Mutex::new(0usize));
        let sink = CountingSink(total_samples.clone());
        run(rx, sink, shutdown_for_worker).unwrap();

        assert!(*total_samples.lock().unwrap() > 0);
    }
}
