//! HDP-Core: response engine for HDP blood-pressure monitors in Rust.
//!
//! This crate exchanges frames with a personal health device over a duplex
//! byte channel, using the device's fixed IEEE 11073-20601 style APDU
//! templates: it answers the association, acknowledges fixed reports,
//! extracts the readings, and releases the association.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Frame codec, tags, outbound templates
//! - **Measurement**: Fixed-report field layout and extraction
//! - **State**: Session state and the per-frame transition function
//! - **Transport**: Channel abstraction (socket, mock)
//! - **Writer**: Single serialized writer per channel
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Channel driver running the read loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hdp_core::session::ChannelDriver;
//! use hdp_core::transport::SocketChannel;
//!
//! let channel = Arc::new(SocketChannel::connect("127.0.0.1:6024")?);
//! let system_id = "0123456789ABCDEF".parse()?;
//! let summary = ChannelDriver::new(channel, system_id).run()?;
//! for m in &summary.measurements {
//!     println!("{m}");
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod events;
pub mod measurement;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
mod writer;

// Re-exports for convenience
pub use events::{CloseReason, HdpEvent, HdpObserver, NullObserver, PacketDirection, TracingObserver};
pub use measurement::{ExtractError, Measurement, ReportLayout};
pub use protocol::{
    DecodeError, Frame, FrameType, InvokeId, OutboundFrame, SystemIdentifier, decode, encode,
};
pub use session::{ChannelDriver, DriverConfig, DriverHandle, SessionSummary};
pub use state::{Action, SessionState, Transition, handle};
pub use transport::{ChannelError, HdpChannel, MockChannel, SocketChannel};
