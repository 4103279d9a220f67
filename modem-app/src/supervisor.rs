//! Wires the modulator and demodulator workers to concrete audio/packet endpoints, owns
//! the shared shutdown flag, and blocks on it with periodic polling so a signal handler
//! has a chance to fire between checks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::audio::{CaptureSource, NullCapture, NullPlayback, PlaybackSink, SoundcardCapture, SoundcardPlayback};
use crate::error::AppError;
use crate::packet_io::{UnixPacketSink, UnixPacketSource};
use crate::{demodulator, modulator};

/// How often the supervisor wakes to check the shutdown flag while workers run.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which workers to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Send,
    Receive,
    Both,
}

/// Endpoint configuration for a supervised run.
pub struct Config {
    pub tun_outbound: PathBuf,
    pub tun_inbound: PathBuf,
    pub mode: Mode,
    pub line_out: Option<String>,
    pub line_in: Option<String>,
}

/// Build the configured endpoints, spawn the requested workers, and block until
/// `shutdown` is set (by a signal handler or a worker failure), then join them.
///
/// Returns `Err` if setup failed before any worker could be spawned, or if a worker
/// exited with an error (which it will have already turned into a shutdown request for
/// the rest of the pipeline).
pub fn run(config: Config, shutdown: Arc<AtomicBool>) -> Result<(), AppError> {
    let mut handles: Vec<(&'static str, JoinHandle<Result<(), AppError>>)> = Vec::new();

    if matches!(config.mode, Mode::Send | Mode::Both) {
        let source = UnixPacketSource::bind(&config.tun_outbound)?;
        let sink: Box<dyn PlaybackSink> = match &config.line_out {
            Some(name) => Box::new(SoundcardPlayback::open(name)?),
            None => {
                info!("no --line-out given, modulator output is discarded");
                Box::new(NullPlayback)
            }
        };
        let worker_shutdown = shutdown.clone();
        handles.push((
            "modulator",
            thread::spawn(move || modulator::run(source, sink, worker_shutdown)),
        ));
    }

    if matches!(config.mode, Mode::Receive | Mode::Both) {
        let sink = UnixPacketSink::bind(&config.tun_inbound)?;
        let source: Box<dyn CaptureSource> = match &config.line_in {
            Some(name) => Box::new(SoundcardCapture::open(name)?),
            None => {
                info!("no --line-in given, demodulator hears only silence");
                Box::new(NullCapture)
            }
        };
        let worker_shutdown = shutdown.clone();
        handles.push((
            "demodulator",
            thread::spawn(move || demodulator::run(source, sink, worker_shutdown)),
        ));
    }

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(POLL_INTERVAL);
        if handles.iter().any(|(_, h)| h.is_finished()) {
            // a worker died without us catching a signal; treat it as a shutdown request
            shutdown.store(true, Ordering::Relaxed);
        }
    }

    let mut first_error = None;
    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{name} exited with an error: {e}");
                first_error.get_or_insert(e);
            }
            Err(_) => {
                error!("{name} panicked");
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selects_workers() {
        assert_eq!(Mode::Send, Mode::Send);
        assert_ne!(Mode::Send, Mode::Receive);
    }
}
