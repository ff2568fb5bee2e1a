//! Frame handlers - one transition per inbound frame.
//!
//! This module is split into submodules by APDU:
//! - `association`: association request
//! - `data`: data exports (fixed report, metadata)
//! - `release`: release request and abort

mod association;
mod data;
mod release;

use tracing::debug;

use crate::protocol::{Frame, FrameType, SystemIdentifier};
use crate::state::machine::{SessionState, Transition};

use association::handle_association_request;
use data::handle_data_export;
use release::{handle_abort, handle_release_request};

/// Decide the next state and outbound frame for an inbound frame.
///
/// Pure apart from logging: the caller owns the state and performs the write.
pub fn handle(state: SessionState, frame: &Frame, system_id: &SystemIdentifier) -> Transition {
    match frame.frame_type() {
        FrameType::AssociationRequest => handle_association_request(state, system_id),
        FrameType::DataExport => handle_data_export(state, frame),
        FrameType::ReleaseRequest => handle_release_request(state),
        FrameType::Abort => handle_abort(state),
        FrameType::AssociationResponse | FrameType::ReleaseResponse => {
            debug!(frame_type = %frame.frame_type(), "Ignoring unexpected response APDU");
            Transition::unchanged(state)
        }
    }
}
