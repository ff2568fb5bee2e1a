//! Outbound frame templates and the identifiers spliced into them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::*;
use super::frame::{Frame, FrameType};
use super::hex::{HexError, from_hex, to_hex};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SystemIdError {
    #[error("System id must be 16 hex digits, got {0}")]
    InvalidLength(usize),
    #[error("Invalid system id: {0}")]
    InvalidHex(#[from] HexError),
}

/// Opaque 2-byte correlation token, echoed from a data export into its
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvokeId([u8; 2]);

impl InvokeId {
    pub const fn new(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 2] {
        self.0
    }
}

impl fmt::Display for InvokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

/// 8-byte identifier of this side of the association.
///
/// Serialized as 16 hex digits, e.g. `"0123456789ABCDEF"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SystemIdentifier([u8; 8]);

impl SystemIdentifier {
    pub const LEN: usize = 8;

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 8] {
        self.0
    }
}

impl FromStr for SystemIdentifier {
    type Err = SystemIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != Self::LEN * 2 {
            return Err(SystemIdError::InvalidLength(trimmed.len()));
        }
        let bytes = from_hex(trimmed)?;
        if bytes.len() != Self::LEN {
            return Err(SystemIdError::InvalidLength(bytes.len() * 2));
        }
        let mut id = [0u8; Self::LEN];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

impl TryFrom<String> for SystemIdentifier {
    type Error = SystemIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SystemIdentifier> for String {
    fn from(id: SystemIdentifier) -> Self {
        id.to_string()
    }
}

impl fmt::Display for SystemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

/// Frames this side sends. Every variant is a canned template; only the
/// association response and the data response carry caller-supplied bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundFrame {
    AssociationResponse(SystemIdentifier),
    DataResponse(InvokeId),
    GetMdsAttributes,
    ReleaseRequest,
    ReleaseResponse,
    Abort,
}

impl OutboundFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            OutboundFrame::AssociationResponse(_) => FrameType::AssociationResponse,
            OutboundFrame::DataResponse(_) | OutboundFrame::GetMdsAttributes => {
                FrameType::DataExport
            }
            OutboundFrame::ReleaseRequest => FrameType::ReleaseRequest,
            OutboundFrame::ReleaseResponse => FrameType::ReleaseResponse,
            OutboundFrame::Abort => FrameType::Abort,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            OutboundFrame::AssociationResponse(system_id) => {
                let mut payload = AARE_PAYLOAD.to_vec();
                payload[AARE_SYSTEM_ID_OFFSET..AARE_SYSTEM_ID_OFFSET + SystemIdentifier::LEN]
                    .copy_from_slice(&system_id.bytes());
                payload
            }
            OutboundFrame::DataResponse(invoke_id) => {
                let mut payload = PRST_RESPONSE_PAYLOAD.to_vec();
                payload[PRST_INVOKE_ID_OFFSET..PRST_INVOKE_ID_OFFSET + 2]
                    .copy_from_slice(&invoke_id.bytes());
                payload
            }
            OutboundFrame::GetMdsAttributes => GET_MDS_PAYLOAD.to_vec(),
            OutboundFrame::ReleaseRequest
            | OutboundFrame::ReleaseResponse
            | OutboundFrame::Abort => REASON_PAYLOAD.to_vec(),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::from_template(self.frame_type(), &self.payload())
    }

    /// Wire bytes of this template.
    pub fn encode(&self) -> Vec<u8> {
        self.to_frame().encode()
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::AssociationResponse(id) => write!(f, "AssociationResponse({})", id),
            OutboundFrame::DataResponse(invoke) => write!(f, "DataResponse({})", invoke),
            OutboundFrame::GetMdsAttributes => write!(f, "GetMdsAttributes"),
            OutboundFrame::ReleaseRequest => write!(f, "ReleaseRequest"),
            OutboundFrame::ReleaseResponse => write!(f, "ReleaseResponse"),
            OutboundFrame::Abort => write!(f, "Abort"),
        }
    }
}
