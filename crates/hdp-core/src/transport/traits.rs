//! Channel abstraction.
//!
//! Defines the `HdpChannel` trait for the duplex byte channel a health device
//! is reached over, allowing different implementations (socket, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract duplex channel.
///
/// Reads and writes happen from different threads, so implementations use
/// interior mutability and must serialize their own write path.
pub trait HdpChannel: Send + Sync {
    /// Read one chunk of at most `max_len` bytes into a fresh buffer.
    ///
    /// `Ok(None)` signals end of stream.
    fn read(&self, max_len: usize) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Write all bytes of one frame.
    fn write(&self, data: &[u8]) -> Result<usize, ChannelError>;

    /// Close the channel, unblocking a pending read. Closing twice is a no-op.
    fn close(&self) -> Result<(), ChannelError>;

    /// Check if the channel has not been closed locally.
    fn is_open(&self) -> bool;
}
