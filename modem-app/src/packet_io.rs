//! Outbound packet source and inbound packet sink for the modem core.
//!
//! The concrete, testable implementation is a pair of `SOCK_DGRAM` Unix domain sockets
//! identified by filesystem paths, matching the process-local datagram endpoints used by
//! the host this modem plugs into. An in-memory loopback pair is also provided, used by
//! the test suite for a lossless round trip.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Duration;

use crate::error::AppError;

/// Largest buffer accepted from the outbound source, before the modulator applies the
/// frame-format ceiling of 4095 bytes.
pub const ABSOLUTELY_MAX_MTU: usize = 20480;

/// Source of outbound datagrams, polled with a timeout.
pub trait PacketSource: Send + 'static {
    /// Block for up to `timeout` waiting for a datagram. `Ok(None)` means the timeout
    /// elapsed with nothing to send.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AppError>;
}

/// Sink for inbound, already-decoded datagrams.
pub trait PacketSink: Send + 'static {
    fn send(&mut self, payload: &[u8]) -> Result<(), AppError>;
}

/// Outbound source bound to a private socket, announcing itself to `peer_path` so the
/// far side knows where to reply.
pub struct UnixPacketSource {
    socket: UnixDatagram,
}

impl UnixPacketSource {
    pub fn bind(peer_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let local_path = private_socket_path("modulator");
        let socket = UnixDatagram::bind(&local_path)
            .map_err(|e| AppError::SocketBind(local_path.clone(), e))?;
        // Announce our reply-to address; an empty datagram carries no payload of its own.
        socket
            .send_to(&[], peer_path.as_ref())
            .map_err(|e| AppError::SocketSend(peer_path.as_ref().to_path_buf(), e))?;
        Ok(Self { socket })
    }
}

impl PacketSource for UnixPacketSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AppError> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(AppError::SocketRecv)?;
        let mut buf = vec![0u8; ABSOLUTELY_MAX_MTU];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(AppError::SocketRecv(e)),
        }
    }
}

/// Inbound sink that forwards every decoded datagram to `target_path`.
pub struct UnixPacketSink {
    socket: UnixDatagram,
    target_path: PathBuf,
}

impl UnixPacketSink {
    pub fn bind(target_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let local_path = private_socket_path("demodulator");
        let socket = UnixDatagram::bind(&local_path)
            .map_err(|e| AppError::SocketBind(local_path.clone(), e))?;
        Ok(Self {
            socket,
            target_path: target_path.into(),
        })
    }
}

impl PacketSink for UnixPacketSink {
    fn send(&mut self, payload: &[u8]) -> Result<(), AppError> {
        self.socket
            .send_to(payload, &self.target_path)
            .map_err(|e| AppError::SocketSend(self.target_path.clone(), e))?;
        Ok(())
    }
}

fn private_socket_path(role: &str) -> PathBuf {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    std::env::temp_dir().join(format!("modem-app-{role}-{}-{n}.sock", std::process::id()))
}

/// In-memory loopback source half, paired with [`LoopbackSink`].
pub struct LoopbackSource {
    rx: Receiver<Vec<u8>>,
}

/// In-memory loopback sink half, paired with [`LoopbackSource`].
pub struct LoopbackSink {
    tx: SyncSender<Vec<u8>>,
}

/// A lossless, in-process datagram channel usable wherever a socket-backed endpoint is
/// expected, for round-trip tests that shouldn't depend on filesystem sockets.
pub fn loopback_pair() -> (LoopbackSink, LoopbackSource) {
    let (tx, rx) = sync_channel(128);
    (LoopbackSink { tx }, LoopbackSource { rx })
}

impl PacketSource for LoopbackSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AppError> {
        match self.rx.recv_timeout(timeout) {
            Ok(buf) => Ok(Some(buf)),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

impl PacketSink for LoopbackSink {
    fn send(&mut self, payload: &[u8]) -> Result<(), AppError> {
        let _ = self.tx.send(payload.to_vec());
        Ok(())
    }
}

impl PacketSource for Box<dyn PacketSource> {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, AppError> {
        (**self).recv_timeout(timeout)
    }
}

impl PacketSink for Box<dyn PacketSink> {
    fn send(&mut self, payload: &[u8]) -> Result<(), AppError> {
        (**self).send(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_delivers_in_order() {
        let (mut sink, mut source) = loopback_pair();
        sink.send(b"A").unwrap();
        sink.send(b"B").unwrap();
        sink.send(b"C").unwrap();
        assert_eq!(
            source.recv_timeout(Duration::from_millis(10)).unwrap(),
            Some(b"A".to_vec())
        );
        assert_eq!(
            source.recv_timeout(Duration::from_millis(10)).unwrap(),
            Some(b"B".to_vec())
        );
        assert_eq!(
            source.recv_timeout(Duration::from_millis(10)).unwrap(),
            Some(b"C".to_vec())
        );
    }

    #[test]
    fn loopback_times_out_when_empty() {
        let (_sink, mut source) = loopback_pair();
        assert_eq!(
            source.recv_timeout(Duration::from_millis(10)).unwrap(),
            None
        );
    }

    #[test]
    fn unix_sockets_round_trip_a_datagram() {
        let dir = std::env::temp_dir();
        let inbound_path =
            dir.join(format!("modem-app-test-inbound-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&inbound_path);
        let receiver = UnixDatagram::bind(&inbound_path).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        let mut sink = UnixPacketSink::bind(&inbound_path).unwrap();
        sink.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[0..n], b"hello");

        std::fs::remove_file(&inbound_path).ok();
    }
}
