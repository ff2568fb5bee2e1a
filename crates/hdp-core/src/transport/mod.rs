//! Transport layer module.

pub mod mock;
pub mod socket;
pub mod traits;

pub use mock::MockChannel;
pub use socket::SocketChannel;
pub use traits::{ChannelError, HdpChannel};
