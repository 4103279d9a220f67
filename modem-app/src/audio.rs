//! Blocking playback/capture traits the modem runs against, and concrete backends:
//! a cpal-backed soundcard, an in-memory buffer for tests, and a null device for
//! headless operation.

use std::borrow::Borrow;
use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfigRange};

use crate::error::AppError;

/// Audio sample rate the modem runs at; see `modem_core::SAMPLE_RATE`.
pub const SAMPLE_RATE: u32 = modem_core::SAMPLE_RATE;

/// A blocking sink for 16-bit mono samples at [`SAMPLE_RATE`].
pub trait PlaybackSink: Send + 'static {
    /// Queue `samples` for playback. May return before they have been emitted.
    fn write(&mut self, samples: &[i16]) -> Result<(), AppError>;

    /// Block until every previously written sample has been emitted by hardware.
    fn drain(&mut self) -> Result<(), AppError>;
}

/// A blocking source of 16-bit mono samples at [`SAMPLE_RATE`].
pub trait CaptureSource: Send + 'static {
    /// Block until exactly `count` samples are available, then return them.
    fn read(&mut self, count: usize) -> Result<Vec<i16>, AppError>;
}

fn config_is_compatible<C: Borrow<SupportedStreamConfigRange>>(config: C) -> bool {
    let config = config.borrow();
    (config.channels() == 1 || config.channels() == 2)
        && config.sample_format() == SampleFormat::I16
        && config.min_sample_rate().0 <= SAMPLE_RATE
        && config.max_sample_rate().0 >= SAMPLE_RATE
}

/// List playback devices compatible with mono 16-bit 44100 Hz output.
pub fn list_output_devices() -> Vec<String> {
    let mut out = vec![];
    let host = cpal::default_host();
    let Ok(devices) = host.output_devices() else {
        return out;
    };
    for d in devices {
        let Ok(mut configs) = d.supported_output_configs() else {
            continue;
        };
        if configs.any(config_is_compatible) {
            if let Ok(name) = d.name() {
                out.push(name);
            }
        }
    }
    out.sort();
    out
}

/// List capture devices compatible with mono 16-bit 44100 Hz input.
pub fn list_input_devices() -> Vec<String> {
    let mut out = vec![];
    let host = cpal::default_host();
    let Ok(devices) = host.input_devices() else {
        return out;
    };
    for d in devices {
        let Ok(mut configs) = d.supported_input_configs() else {
            continue;
        };
        if configs.any(config_is_compatible) {
            if let Ok(name) = d.name() {
                out.push(name);
            }
        }
    }
    out.sort();
    out
}

/// Shared queue a playback callback drains from and [`SoundcardPlayback::write`] fills.
struct PlaybackRing {
    samples: Mutex<VecDeque<i16>>,
    drained: Condvar,
}

/// A soundcard-backed playback sink.
///
/// Owns a background thread holding the (non-`Send`) cpal stream; samples cross the
/// thread boundary through a shared ring buffer rather than the stream itself.
pub struct SoundcardPlayback {
    ring: Arc<PlaybackRing>,
    _stream_thread: StreamThread,
}

impl SoundcardPlayback {
    pub fn open(device_name: &str) -> Result<Self, AppError> {
        let ring = Arc::new(PlaybackRing {
            samples: Mutex::new(VecDeque::new()),
            drained: Condvar::new(),
        });
        let (ready_tx, ready_rx) = sync_channel(1);
        let (close_tx, close_rx) = sync_channel(1);
        let ring_for_worker = ring.clone();
        let name = device_name.to_string();
        let handle = std::thread::spawn(move || {
            run_playback_worker(name, ring_for_worker, ready_tx, close_rx);
        });
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                ring,
                _stream_thread: StreamThread {
                    close_tx,
                    handle: Some(handle),
                },
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::DeviceInit),
        }
    }
}

impl PlaybackSink for SoundcardPlayback {
    fn write(&mut self, samples: &[i16]) -> Result<(), AppError> {
        let mut q = self.ring.samples.lock().unwrap();
        q.extend(samples.iter().copied());
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AppError> {
        let q = self.ring.samples.lock().unwrap();
        let _unused = self
            .ring
            .drained
            .wait_while(q, |q| !q.is_empty())
            .unwrap();
        Ok(())
    }
}

fn run_playback_worker(
    device_name: String,
    ring: Arc<PlaybackRing>,
    ready_tx: SyncSender<Result<(), AppError>>,
    close_rx: Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.devices() {
        Ok(mut devices) => devices.find(|d| d.name().map(|n| n == device_name).unwrap_or(false)),
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::DeviceEnumeration(e)));
            return;
        }
    };
    let Some(device) = device else {
        let _ = ready_tx.send(Err(AppError::DeviceNotFound(device_name)));
        return;
    };

    let mut configs = match device.supported_output_configs() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::SupportedConfigs(e)));
            return;
        }
    };
    let Some(config) = configs.find(config_is_compatible) else {
        let _ = ready_tx.send(Err(AppError::NoValidConfigAvailable));
        return;
    };
    let config = config.with_sample_rate(SampleRate(SAMPLE_RATE));
    let channels = config.channels();

    let ring_cb = ring.clone();
    let stream = match device.build_output_stream(
        &config.into(),
        move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
            let mut q = ring_cb.samples.lock().unwrap();
            for frame in data.chunks_mut(channels as usize) {
                let sample = q.pop_front().unwrap_or(0);
                frame.fill(sample);
            }
            if q.is_empty() {
                ring_cb.drained.notify_all();
            }
        },
        move |e| {
            log::error!("playback stream error: {e}");
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::StreamBuild(e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AppError::StreamPlay(e)));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    let _ = close_rx.recv();
    drop(stream);
}

/// A soundcard-backed capture source.
pub struct SoundcardCapture {
    rx: Mutex<Receiver<Arc<[i16]>>>,
    partial: Mutex<Option<Partial>>,
    _stream_thread: StreamThread,
}

struct Partial {
    chunk: Arc<[i16]>,
    idx: usize,
}

impl SoundcardCapture {
    pub fn open(device_name: &str) -> Result<Self, AppError> {
        let (sample_tx, sample_rx) = sync_channel(128);
        let (ready_tx, ready_rx) = sync_channel(1);
        let (close_tx, close_rx) = sync_channel(1);
        let name = device_name.to_string();
        let handle = std::thread::spawn(move || {
            run_capture_worker(name, sample_tx, ready_tx, close_rx);
        });
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                rx: Mutex::new(sample_rx),
                partial: Mutex::new(None),
                _stream_thread: StreamThread {
                    close_tx,
                    handle: Some(handle),
                },
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::DeviceInit),
        }
    }
}

impl CaptureSource for SoundcardCapture {
    fn read(&mut self, count: usize) -> Result<Vec<i16>, AppError> {
        let mut out = Vec::with_capacity(count);
        {
            let mut partial = self.partial.lock().unwrap();
            if let Some(p) = partial.as_mut() {
                let take = (p.chunk.len() - p.idx).min(count);
                out.extend_from_slice(&p.chunk[p.idx..p.idx + take]);
                p.idx += take;
                if p.idx == p.chunk.len() {
                    *partial = None;
                }
            }
        }
        let rx = self.rx.lock().unwrap();
        while out.len() < count {
            let chunk = rx.recv().map_err(|_| {
                AppError::SocketRecv(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "capture stream closed",
                ))
            })?;
            let need = count - out.len();
            if chunk.len() <= need {
                out.extend_from_slice(&chunk);
            } else {
                out.extend_from_slice(&chunk[0..need]);
                *self.partial.lock().unwrap() = Some(Partial { chunk, idx: need });
            }
        }
        Ok(out)
    }
}

fn run_capture_worker(
    device_name: String,
    sample_tx: SyncSender<Arc<[i16]>>,
    ready_tx: SyncSender<Result<(), AppError>>,
    close_rx: Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.devices() {
        Ok(mut devices) => devices.find(|d| d.name().map(|n| n == device_name).unwrap_or(false)),
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::DeviceEnumeration(e)));
            return;
        }
    };
    let Some(device) = device else {
        let _ = ready_tx.send(Err(AppError::DeviceNotFound(device_name)));
        return;
    };

    let mut configs = match device.supported_input_configs() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::SupportedConfigs(e)));
            return;
        }
    };
    let Some(config) = configs.find(config_is_compatible) else {
        let _ = ready_tx.send(Err(AppError::NoValidConfigAvailable));
        return;
    };
    let config = config.with_sample_rate(SampleRate(SAMPLE_RATE));
    let channels = config.channels();

    let stream = match device.build_input_stream(
        &config.into(),
        move |data: &[i16], _info: &cpal::InputCallbackInfo| {
            let mono: Vec<i16> = data.chunks(channels as usize).map(|f| f[0]).collect();
            let _ = sample_tx.try_send(mono.into());
        },
        move |e| {
            log::error!("capture stream error: {e}");
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::StreamBuild(e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AppError::StreamPlay(e)));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    let _ = close_rx.recv();
    drop(stream);
}

/// Keeps a device worker thread (and its non-`Send` cpal stream) alive until dropped.
struct StreamThread {
    close_tx: SyncSender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.close_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Fixed in-memory playback sink, for tests: records every sample ever written.
#[derive(Default)]
pub struct MemoryPlayback {
    pub recorded: Vec<i16>,
}

impl PlaybackSink for MemoryPlayback {
    fn write(&mut self, samples: &[i16]) -> Result<(), AppError> {
        self.recorded.extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Fixed in-memory capture source, for tests: replays a preloaded sample buffer, then
/// an endless run of silence.
pub struct MemoryCapture {
    samples: VecDeque<i16>,
}

impl MemoryCapture {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }
}

impl CaptureSource for MemoryCapture {
    fn read(&mut self, count: usize) -> Result<Vec<i16>, AppError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.samples.pop_front().unwrap_or(0));
        }
        Ok(out)
    }
}

/// Discards every sample written; used when running without real output hardware.
#[derive(Default)]
pub struct NullPlayback;

impl PlaybackSink for NullPlayback {
    fn write(&mut self, _samples: &[i16]) -> Result<(), AppError> {
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Produces silence forever; used when running without real input hardware.
#[derive(Default)]
pub struct NullCapture;

impl CaptureSource for NullCapture {
    fn read(&mut self, count: usize) -> Result<Vec<i16>, AppError> {
        Ok(vec![0i16; count])
    }
}

impl PlaybackSink for Box<dyn PlaybackSink> {
    fn write(&mut self, samples: &[i16]) -> Result<(), AppError> {
        (**self).write(samples)
    }

    fn drain(&mut self) -> Result<(), AppError> {
        (**self).drain()
    }
}

impl CaptureSource for Box<dyn CaptureSource> {
    fn read(&mut self, count: usize) -> Result<Vec<i16>, AppError> {
        (**self).read(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_playback_records_samples() {
        let mut sink = MemoryPlayback::default();
        sink.write(&[1, 2, 3]).unwrap();
        sink.write(&[4, 5]).unwrap();
        sink.drain().unwrap();
        assert_eq!(sink.recorded, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn memory_capture_pads_with_silence_once_exhausted() {
        let mut src = MemoryCapture::new(vec![7, 8, 9]);
        assert_eq!(src.read(2).unwrap(), vec![7, 8]);
        assert_eq!(src.read(4).unwrap(), vec![9, 0, 0, 0]);
    }

    #[test]
    fn null_devices_are_inert() {
        let mut sink = NullPlayback;
        sink.write(&[1, 2, 3]).unwrap();
        sink.drain().unwrap();
        let mut src = NullCapture;
        assert_eq!(src.read(5).unwrap(), vec![0; 5]);
    }
}
