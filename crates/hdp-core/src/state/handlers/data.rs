//! Data export handlers.

use tracing::{debug, info, warn};

use crate::measurement;
use crate::protocol::{Frame, OutboundFrame};
use crate::state::machine::{Action, SessionState, Transition};

/// PRST - fixed report or metadata export.
pub fn handle_data_export(state: SessionState, frame: &Frame) -> Transition {
    if frame.has_fixed_report_marker() {
        handle_fixed_report(state, frame)
    } else {
        handle_metadata_export(state)
    }
}

/// Fixed report: acknowledge with the device's invoke id and extract the
/// reading.
fn handle_fixed_report(state: SessionState, frame: &Frame) -> Transition {
    let Some(invoke_id) = frame.invoke_id() else {
        // The marker sits past the invoke id, so this only happens on a
        // malformed frame.
        warn!("PRST: Fixed report without invoke id");
        return Transition::unchanged(state);
    };

    let measurement = match measurement::extract(&frame.encode()) {
        Ok(m) => {
            info!(measurement = %m, "PRST: Fixed report received");
            Some(m)
        }
        Err(e) => {
            warn!(error = %e, "PRST: Fixed report could not be parsed");
            None
        }
    };

    Transition {
        state: SessionState::DataAcked,
        action: Action::Reply(OutboundFrame::DataResponse(invoke_id)),
        measurement,
    }
}

/// Metadata (all-zero) export sent ahead of the fixed report. Rather than
/// answer it, solicit the MDS attributes once the device has settled.
fn handle_metadata_export(state: SessionState) -> Transition {
    debug!(from = %state, "PRST: Metadata export, deferring MDS attribute request");
    Transition {
        state: SessionState::AwaitingMds,
        action: Action::Defer(OutboundFrame::GetMdsAttributes),
        measurement: None,
    }
}
