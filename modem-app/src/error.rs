use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unable to enumerate audio devices: {0}")]
    DeviceEnumeration(#[source] cpal::DevicesError),

    #[error("unable to locate audio device '{0}' - is it in use?")]
    DeviceNotFound(String),

    #[error("unable to retrieve supported configs for audio device: {0}")]
    SupportedConfigs(#[source] cpal::SupportedStreamConfigsError),

    #[error("audio device has no config compatible with mono 16-bit 44100 Hz")]
    NoValidConfigAvailable,

    #[error("unable to build audio stream: {0}")]
    StreamBuild(#[source] cpal::BuildStreamError),

    #[error("unable to play audio stream")]
    StreamPlay(#[source] cpal::PlayStreamError),

    #[error("error occurred in audio device i/o: {0}")]
    Stream(#[source] cpal::StreamError),

    #[error("audio device init aborted unexpectedly")]
    DeviceInit,

    #[error("unable to bind outbound socket at '{0}': {1}")]
    SocketBind(PathBuf, #[source] std::io::Error),

    #[error("unable to send to inbound socket at '{0}': {1}")]
    SocketSend(PathBuf, #[source] std::io::Error),

    #[error("unable to receive from outbound socket: {0}")]
    SocketRecv(#[source] std::io::Error),

    #[error("outbound datagram is {len} bytes, exceeding the transport ceiling of {max}")]
    DatagramTooLarge { len: usize, max: usize },

    #[error("payload is {provided} bytes, but the frame format carries at most {capacity}")]
    PayloadTooLarge { provided: usize, capacity: usize },
}
