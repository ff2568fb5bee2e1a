//! TCP socket channel.
//!
//! Health devices reach the host through a platform-specific data channel;
//! a socket is how that channel is handed to this process (for example by a
//! Bluetooth HDP bridge), and what the CLI listens on.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument};

use super::traits::{ChannelError, HdpChannel};

/// Socket-backed channel.
pub struct SocketChannel {
    stream: TcpStream,
    write_lock: Mutex<()>,
    closed: AtomicBool,
    peer: Option<SocketAddr>,
}

impl SocketChannel {
    /// Connect to a device bridge.
    #[instrument(level = "info", skip(addr))]
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        debug!(peer = ?peer, "Socket channel opened");
        Ok(Self {
            stream,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            peer,
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl HdpChannel for SocketChannel {
    fn read(&self, max_len: usize) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buf = vec![0u8; max_len];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // A local close shuts the socket down under a blocked read.
                Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(None),
                Err(e) => return Err(ChannelError::ReadFailed(e.to_string())),
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ChannelError::WriteFailed("write lock poisoned".into()))?;
        (&self.stream)
            .write_all(data)
            .and_then(|_| (&self.stream).flush())
            .map_err(|e| ChannelError::WriteFailed(e.to_string()))?;
        Ok(data.len())
    }

    fn close(&self) -> Result<(), ChannelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(peer = ?self.peer, "Closing socket channel");
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (SocketChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = SocketChannel::connect(addr).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (channel, peer)
    }

    #[test]
    fn test_socket_read_write() {
        let (channel, mut peer) = pair();

        peer.write_all(&[0xE2, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(channel.read(1000).unwrap(), Some(vec![0xE2, 0x00, 0x00, 0x00]));

        channel.write(&[0xE5, 0x00, 0x00, 0x02, 0x00, 0x00]).unwrap();
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xE5, 0x00, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_socket_end_of_stream() {
        let (channel, peer) = pair();
        drop(peer);
        assert_eq!(channel.read(1000).unwrap(), None);
    }

    #[test]
    fn test_socket_close_is_idempotent() {
        let (channel, _peer) = pair();
        assert!(channel.is_open());
        channel.close().unwrap();
        channel.close().unwrap();
        assert!(!channel.is_open());
        assert_eq!(channel.read(1000).unwrap(), None);
        assert!(matches!(channel.write(&[0x00]), Err(ChannelError::Closed)));
    }
}
