//! Association handler.

use tracing::info;

use crate::protocol::{OutboundFrame, SystemIdentifier};
use crate::state::machine::{SessionState, Transition};

/// AARQ - answer with the canned association response.
///
/// A repeated request from an already associated device is answered again.
pub fn handle_association_request(
    state: SessionState,
    system_id: &SystemIdentifier,
) -> Transition {
    if state.is_associated() {
        info!(state = %state, "AARQ: Device re-associating");
    } else {
        info!(system_id = %system_id, "AARQ: Accepting association");
    }
    Transition::reply(
        SessionState::Associated,
        OutboundFrame::AssociationResponse(*system_id),
    )
}
