//! Release and abort handlers.

use tracing::{info, warn};

use crate::protocol::OutboundFrame;
use crate::state::machine::{SessionState, Transition};

/// RLRQ - acknowledge the release.
pub fn handle_release_request(state: SessionState) -> Transition {
    info!(from = %state, "RLRQ: Association released by device");
    Transition::reply(SessionState::Released, OutboundFrame::ReleaseResponse)
}

/// ABRT - nothing to answer; the device is expected to drop the channel.
pub fn handle_abort(state: SessionState) -> Transition {
    warn!(state = %state, "ABRT: Device aborted the association");
    Transition::unchanged(state)
}
