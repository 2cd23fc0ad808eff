//! Shared data contract between the gateway codecs, the Fast Packet
//! assembler, the decoder engine and the address mapper. Everything that
//! crosses a module boundary is defined here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

//==================================================================================Constants

/// Maximum total payload of a Fast Packet transfer.
///
/// The first frame carries 6 payload bytes, the 31 possible follow-up frames
/// carry 7 each: `6 + 31 * 7 = 223`.
pub const FAST_PACKET_MAX_SIZE: usize = 223;

/// Maximum payload of an ISO 11783-3 Transport Protocol transfer. This crate
/// does not reassemble ISO-TP but carries such payloads when a gateway
/// (e.g. Actisense W2K-1) has already assembled them in hardware.
pub const ISO_TP_MAX_SIZE: usize = 1785;

/// Source address used by a node that has not (yet) claimed an address.
pub const ADDRESS_NULL: u8 = 254;
/// Destination address meaning "all nodes on the bus".
pub const ADDRESS_GLOBAL: u8 = 255;

/// PGN 59904 - ISO Request.
pub const PGN_ISO_REQUEST: u32 = 59_904;
/// PGN 60928 - ISO Address Claim, carries the 64-bit NAME.
pub const PGN_ISO_ADDRESS_CLAIM: u32 = 60_928;
/// PGN 126464 - PGN List (transmit/receive capability announcement).
pub const PGN_PGN_LIST: u32 = 126_464;
/// PGN 126996 - Product Information.
pub const PGN_PRODUCT_INFO: u32 = 126_996;
/// PGN 126998 - Configuration Information.
pub const PGN_CONFIGURATION_INFO: u32 = 126_998;

/// Offset added to the first body byte of an Actisense device (gateway
/// control) message so it can be looked up in the canboat schema like an
/// ordinary PGN.
pub const ACTISENSE_FAKE_PGN_OFFSET: u32 = 0x40000;

//==================================================================================Header

/// Logical fields packed into the 29-bit extended CAN identifier.
///
/// `destination` is [`ADDRESS_GLOBAL`] for PDU2 (broadcast) traffic; the
/// split is derived exclusively from the identifier by
/// [`parse_can_id`](crate::protocol::transport::can_id::parse_can_id).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanBusHeader {
    pub pgn: u32,
    /// Bus arbitration priority, 0 (highest) to 7.
    pub priority: u8,
    pub source: u8,
    pub destination: u8,
}

//==================================================================================Frames and messages

/// One CAN 2.0B frame as read from the wire: up to 8 data bytes plus the
/// already-decoded header and the wall-clock read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub time: DateTime<Utc>,
    pub header: CanBusHeader,
    /// Number of valid bytes in `data`, 1..=8.
    pub length: u8,
    /// Payload padded with zeroes past `length`.
    pub data: [u8; 8],
}

impl RawFrame {
    /// The valid payload slice.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.length.min(8))]
    }
}

/// One complete PGN payload: either a single frame, a reassembled Fast
/// Packet, or an ISO-TP transfer assembled by gateway hardware.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// When the (last) frame of this message was read from the bus.
    pub time: DateTime<Utc>,
    pub header: CanBusHeader,
    /// 1..=1785 bytes.
    pub data: Vec<u8>,
}

/// A decoded message: the header of the triggering [`RawMessage`] plus the
/// typed field values in the declaration order of the matched PGN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub time: DateTime<Utc>,
    pub header: CanBusHeader,
    pub fields: Vec<FieldValue>,
}

impl Message {
    /// First field with the given canboat field identifier, if decoded.
    pub fn field(&self, id: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.id == id)
    }
}

//==================================================================================Field values

/// One decoded PGN field: the canboat field identifier and its typed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub id: String,
    #[serde(flatten)]
    pub value: Value,
}

impl FieldValue {
    pub fn new(id: &str, value: Value) -> Self {
        Self {
            id: id.to_owned(),
            value,
        }
    }
}

/// Tagged union of every value shape a PGN field can decode to.
///
/// The set is closed on purpose: emitters (JSON, CSV) match on it
/// exhaustively. `EnumSet` is produced only by BITLOOKUP fields, `FieldSet`
/// only by repeating field groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Elapsed time (TIME/DURATION fields), nanosecond precision.
    Duration(std::time::Duration),
    /// Calendar date (DATE fields): Unix epoch + raw day count.
    Date(NaiveDate),
    Enum(EnumValue),
    EnumSet(Vec<EnumValue>),
    /// One entry per repeating-group instance.
    FieldSet(Vec<Vec<FieldValue>>),
}

impl Value {
    /// Numeric view of the value where one exists.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Duration(d) => Some(d.as_secs_f64()),
            _ => None,
        }
    }

    /// Unsigned view, for counters and lookup codes.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

/// Resolved lookup entry: the raw code and its schema name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumValue {
    pub value: u32,
    pub code: String,
}

//==================================================================================Proprietary ranges

/// J1939 proprietary PGN windows, useful for diagnostics on traffic the
/// schema does not describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProprietaryRange {
    /// 61184..=61439, addressed single-frame.
    Pdu1SingleFrame,
    /// 65280..=65535, broadcast single-frame.
    Pdu2SingleFrame,
    /// 126720..=126975, addressed fast-packet.
    Pdu1FastPacket,
    /// 130816..=131071, broadcast fast-packet.
    Pdu2FastPacket,
}

impl CanBusHeader {
    /// Classify the PGN into one of the manufacturer-assigned windows.
    pub fn proprietary_range(&self) -> Option<ProprietaryRange> {
        match self.pgn {
            0xEF00..=0xEFFF => Some(ProprietaryRange::Pdu1SingleFrame),
            0xFF00..=0xFFFF => Some(ProprietaryRange::Pdu2SingleFrame),
            0x1EF00..=0x1EFFF => Some(ProprietaryRange::Pdu1FastPacket),
            0x1FF00..=0x1FFFF => Some(ProprietaryRange::Pdu2FastPacket),
            _ => None,
        }
    }
}
