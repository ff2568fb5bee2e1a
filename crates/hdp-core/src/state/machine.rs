//! Session state and transition types for the response engine.

use std::fmt;

use crate::measurement::Measurement;
use crate::protocol::OutboundFrame;

/// Association state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Channel open, nothing received yet.
    #[default]
    Idle,
    /// Association response sent.
    Associated,
    /// Metadata export seen, MDS attributes requested.
    AwaitingMds,
    /// Fixed report acknowledged.
    DataAcked,
    /// Release response sent.
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Associated => write!(f, "ASSOCIATED"),
            SessionState::AwaitingMds => write!(f, "AWAITING_MDS"),
            SessionState::DataAcked => write!(f, "DATA_ACKED"),
            SessionState::Released => write!(f, "RELEASED"),
        }
    }
}

impl SessionState {
    /// Check if an association is in place.
    pub fn is_associated(&self) -> bool {
        matches!(
            self,
            SessionState::Associated | SessionState::AwaitingMds | SessionState::DataAcked
        )
    }
}

/// What the writer should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to send.
    None,
    /// Send immediately.
    Reply(OutboundFrame),
    /// Send after the settling delay, or as soon as the peer's next frame
    /// arrives.
    Defer(OutboundFrame),
}

impl Action {
    pub fn frame(&self) -> Option<&OutboundFrame> {
        match self {
            Action::None => None,
            Action::Reply(frame) | Action::Defer(frame) => Some(frame),
        }
    }
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub action: Action,
    pub measurement: Option<Measurement>,
}

impl Transition {
    pub fn unchanged(state: SessionState) -> Self {
        Self {
            state,
            action: Action::None,
            measurement: None,
        }
    }

    pub fn reply(state: SessionState, frame: OutboundFrame) -> Self {
        Self {
            state,
            action: Action::Reply(frame),
            measurement: None,
        }
    }
}
