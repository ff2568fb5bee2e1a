//! APDU frame codec.
//!
//! Wire layout (all multi-byte integers big-endian):
//!
//! ```text
//! offset 0     tag (1 byte)
//! offset 1     reserved (1 byte, 0x00, not validated)
//! offset 2..4  payload length (u16)
//! offset 4..   payload
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::*;
use super::hex::to_hex;
use super::templates::InvokeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Unknown frame type: 0x{tag:02X}")]
    UnknownType { tag: u8 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload of {0} bytes does not fit a u16 length field")]
    PayloadTooLarge(usize),
}

/// APDU type, identified by the leading tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    AssociationRequest,
    AssociationResponse,
    ReleaseRequest,
    ReleaseResponse,
    Abort,
    DataExport,
}

impl FrameType {
    pub const fn tag(self) -> u8 {
        match self {
            FrameType::AssociationRequest => TAG_AARQ,
            FrameType::AssociationResponse => TAG_AARE,
            FrameType::ReleaseRequest => TAG_RLRQ,
            FrameType::ReleaseResponse => TAG_RLRE,
            FrameType::Abort => TAG_ABRT,
            FrameType::DataExport => TAG_PRST,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_AARQ => Some(FrameType::AssociationRequest),
            TAG_AARE => Some(FrameType::AssociationResponse),
            TAG_RLRQ => Some(FrameType::ReleaseRequest),
            TAG_RLRE => Some(FrameType::ReleaseResponse),
            TAG_ABRT => Some(FrameType::Abort),
            TAG_PRST => Some(FrameType::DataExport),
            _ => None,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(DecodeError::UnknownType { tag })
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::AssociationRequest => write!(f, "AARQ"),
            FrameType::AssociationResponse => write!(f, "AARE"),
            FrameType::ReleaseRequest => write!(f, "RLRQ"),
            FrameType::ReleaseResponse => write!(f, "RLRE"),
            FrameType::Abort => write!(f, "ABRT"),
            FrameType::DataExport => write!(f, "PRST"),
        }
    }
}

/// A single decoded (or to-be-encoded) frame.
///
/// The length field is derived from the payload, so `length() ==
/// payload().len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    reserved: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > u16::MAX as usize {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            frame_type,
            reserved: 0,
            payload,
        })
    }

    /// Build a frame from a fixed template. Templates are all far below the
    /// u16 limit.
    pub(crate) fn from_template(frame_type: FrameType, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        Self {
            frame_type,
            reserved: 0,
            payload: payload.to_vec(),
        }
    }

    /// Decode one frame from the start of `bytes`.
    ///
    /// Bytes after the declared payload are ignored; the caller decides
    /// whether they matter.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let frame_type = FrameType::try_from(bytes[0])?;
        let length = BigEndian::read_u16(&bytes[LENGTH_OFFSET..HEADER_SIZE]) as usize;
        let expected = HEADER_SIZE + length;
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            frame_type,
            reserved: bytes[1],
            payload: bytes[HEADER_SIZE..expected].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        buf[0] = self.frame_type.tag();
        buf[1] = self.reserved;
        BigEndian::write_u16(&mut buf[LENGTH_OFFSET..HEADER_SIZE], self.length());
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn length(&self) -> u16 {
        self.payload.len() as u16
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total size on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Invoke id of a data export frame (frame bytes 6..8).
    pub fn invoke_id(&self) -> Option<InvokeId> {
        if self.frame_type != FrameType::DataExport {
            return None;
        }
        self.field(INVOKE_ID_OFFSET, 2)
            .map(|b| InvokeId::new([b[0], b[1]]))
    }

    /// Whether frame bytes 18..20 carry the fixed-report marker.
    ///
    /// Vendor convention of the target device; there is no schema behind it.
    pub fn has_fixed_report_marker(&self) -> bool {
        self.frame_type == FrameType::DataExport
            && self.field(FIXED_REPORT_MARKER_OFFSET, 2) == Some(&FIXED_REPORT_MARKER[..])
    }

    /// Payload slice addressed by full-frame offset.
    fn field(&self, frame_offset: usize, len: usize) -> Option<&[u8]> {
        let start = frame_offset.checked_sub(HEADER_SIZE)?;
        self.payload.get(start..start + len)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} len={} {}", self.frame_type, self.length(), to_hex(&self.payload))
    }
}

/// Decode one frame from a chunk.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    Frame::decode(bytes)
}

/// Serialize a frame to wire bytes.
pub fn encode(frame: &Frame) -> Vec<u8> {
    frame.encode()
}
