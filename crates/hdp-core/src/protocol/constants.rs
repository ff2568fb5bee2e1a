//! Protocol constants for the blood-pressure monitor exchange.
//!
//! Loosely follows IEEE 11073-20601 APDU framing, but every template below is
//! a canned byte sequence captured from the target device family.

// ============================================================================
// Frame Header
// ============================================================================

/// Header size: tag (1) + reserved (1) + payload length (2, big-endian).
pub const HEADER_SIZE: usize = 4;

/// Offset of the payload length field inside the header.
pub const LENGTH_OFFSET: usize = 2;

// ============================================================================
// APDU Tags
// ============================================================================

/// Association request (device -> manager)
pub const TAG_AARQ: u8 = 0xE2;
/// Association response (manager -> device)
pub const TAG_AARE: u8 = 0xE3;
/// Release request
pub const TAG_RLRQ: u8 = 0xE4;
/// Release response
pub const TAG_RLRE: u8 = 0xE5;
/// Abort
pub const TAG_ABRT: u8 = 0xE6;
/// Presentation APDU carrying a data export (both directions)
pub const TAG_PRST: u8 = 0xE7;

// ============================================================================
// Inbound Frame Layout (offsets into the full frame, header included)
// ============================================================================

/// Invoke id of a data export frame.
pub const INVOKE_ID_OFFSET: usize = 6;

/// Marker pair distinguishing a fixed report from a metadata-only export.
pub const FIXED_REPORT_MARKER_OFFSET: usize = 18;
pub const FIXED_REPORT_MARKER: [u8; 2] = [0x0D, 0x1F];

// ============================================================================
// Outbound Templates (payload bytes only)
// ============================================================================

/// Association response payload length.
pub const AARE_PAYLOAD_LEN: usize = 0x2C;

/// Offset of the system identifier inside the association response payload
/// (frame offset 30).
pub const AARE_SYSTEM_ID_OFFSET: usize = 26;

/// Association response: accepted, 20601 data protocol, system id zeroed.
pub const AARE_PAYLOAD: [u8; AARE_PAYLOAD_LEN] = [
    0x00, 0x00, // result: accepted
    0x50, 0x79, // data-proto-id: 20601
    0x00, 0x26, // data-proto-info length
    0x80, 0x00, 0x00, 0x00, // protocol version
    0x80, 0x00, // encoding rules: MDER
    0x80, 0x00, 0x00, 0x00, // nomenclature version
    0x00, 0x00, 0x00, 0x00, // functional units
    0x80, 0x00, 0x00, 0x00, // system type: manager
    0x00, 0x08, // system id length
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // system id slot
    0x00, 0x00, // dev-config-id
    0x00, 0x00, 0x00, 0x00, // data request mode capabilities
    0x00, 0x00, 0x00, 0x00, // option list
];

/// Data response payload length.
pub const PRST_RESPONSE_PAYLOAD_LEN: usize = 0x12;

/// Offset of the invoke id inside a data export payload (frame offset 6).
pub const PRST_INVOKE_ID_OFFSET: usize = 2;

/// Confirmed event report response, acknowledging a fixed report.
pub const PRST_RESPONSE_PAYLOAD: [u8; PRST_RESPONSE_PAYLOAD_LEN] = [
    0x00, 0x10, // octet string length
    0x00, 0x00, // invoke id slot
    0x02, 0x01, // rors-cmip-confirmed-event-report
    0x00, 0x0A, // length
    0x00, 0x00, // obj-handle
    0x00, 0x00, 0x00, 0x00, // currentTime
    0x0D, 0x1F, // event-type: fixed report acknowledged
    0x00, 0x00, // event-reply-info length
];

/// Get MDS attributes request payload length.
pub const GET_MDS_PAYLOAD_LEN: usize = 0x0E;

/// Roiv-cmip-get on the MDS object, all attributes.
pub const GET_MDS_PAYLOAD: [u8; GET_MDS_PAYLOAD_LEN] = [
    0x00, 0x0C, // octet string length
    0x4A, 0x05, // invoke id (fixed for this request)
    0x01, 0x03, // roiv-cmip-get
    0x00, 0x06, // length
    0x00, 0x00, // obj-handle: MDS
    0x00, 0x00, 0x00, 0x00, // attribute-id-list: empty (all)
];

/// Release request/response and abort all carry a two-byte reason of zero.
pub const REASON_PAYLOAD: [u8; 2] = [0x00, 0x00];

// ============================================================================
// Driver Defaults
// ============================================================================

/// Read buffer size per chunk.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1000;

/// Settling delay before a deferred MDS attribute request is written.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 300;

/// Depth of the writer command queue.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 16;
