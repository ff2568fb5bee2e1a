//! Protocol module - APDU framing and canned templates.

pub mod constants;
pub mod frame;
pub mod hex;
pub mod templates;

pub use constants::*;
pub use frame::{DecodeError, Frame, FrameError, FrameType, decode, encode};
pub use templates::{InvokeId, OutboundFrame, SystemIdError, SystemIdentifier};
