//! Event system for UI decoupling.
//!
//! Allows a service or UI layer to subscribe to protocol events without
//! tight coupling to the engine.

use std::fmt;

use crate::measurement::Measurement;
use crate::protocol::{FrameType, SystemIdentifier};
use crate::state::SessionState;

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Manager -> Device
    Rx, // Device -> Manager
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream.
    EndOfStream,
    /// Closed from this side (handle, abort or release).
    Local,
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Events emitted by a channel driver.
#[derive(Debug, Clone, PartialEq)]
pub enum HdpEvent {
    /// Association response queued for the device.
    AssociationEstablished { system_id: SystemIdentifier },
    /// A fixed report was parsed.
    MeasurementReceived(Measurement),
    /// Session state changed.
    StateChanged { from: SessionState, to: SessionState },
    /// Frame received or written.
    Packet {
        direction: PacketDirection,
        frame_type: FrameType,
        length: usize,
    },
    /// A chunk did not line up with a frame boundary.
    Desynchronized { reason: String },
    /// The channel is gone. Published exactly once per session.
    ChannelClosed { reason: CloseReason },
}

/// Observer trait for receiving driver events.
///
/// Called from the read and writer threads; implement this in your UI layer.
pub trait HdpObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &HdpEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl HdpObserver for NullObserver {
    fn on_event(&self, _event: &HdpEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl HdpObserver for TracingObserver {
    fn on_event(&self, event: &HdpEvent) {
        match event {
            HdpEvent::AssociationEstablished { system_id } => {
                tracing::info!(system_id = %system_id, "Association established");
            }
            HdpEvent::MeasurementReceived(m) => {
                tracing::info!(
                    systolic = m.systolic,
                    diastolic = m.diastolic,
                    pulse = m.pulse,
                    "Measurement: {}",
                    m
                );
            }
            HdpEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            HdpEvent::Packet {
                direction,
                frame_type,
                length,
            } => {
                tracing::debug!(dir = %direction, type_ = %frame_type, len = length, "Frame");
            }
            HdpEvent::Desynchronized { reason } => {
                tracing::warn!(reason = %reason, "Stream desynchronized");
            }
            HdpEvent::ChannelClosed { reason } => {
                tracing::info!(reason = %reason, "Channel closed");
            }
        }
    }
}
