//! Error definitions shared across library modules. Each enum models one
//! failure domain (bit extraction, schema validation, message decoding,
//! gateway I/O, address mapping).

use thiserror::Error;

//==================================================================================FIELD_ERROR

/// Failures while extracting a field value from a raw payload.
///
/// The first three variants are the NMEA 2000 reserved codepoints near the
/// top of every numeric encoding. They are not faults: the decoder drops
/// the field and carries on. Everything else aborts the message decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    /// Most positive codepoint: the sender has no value for this field.
    #[error("field value has no data")]
    NoData,
    /// Most positive codepoint minus one: the sensor value left its range.
    #[error("field value out of range")]
    OutOfRange,
    /// Most positive codepoint minus two: reserved by the specification.
    #[error("field value is reserved")]
    Reserved,

    /// Requested bits extend past the end of the payload.
    #[error("bit offset is out of bounds of data")]
    OutOfBounds,
    /// Requested more bits than the target type can carry.
    #[error("cannot extract more than {max} bits, requested {asked}")]
    TooLong { max: u16, asked: u16 },
    /// Payload bytes violate the field encoding (bad BCD digit, invalid
    /// string header, unknown LAU encoding byte...).
    #[error("invalid field encoding: {reason}")]
    InvalidFormat { reason: &'static str },
}

impl FieldError {
    /// `true` for the three reserved codepoints that mean "drop the field".
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            FieldError::NoData | FieldError::OutOfRange | FieldError::Reserved
        )
    }
}

//==================================================================================SCHEMA_ERROR

/// Canboat schema problems detected while building the store. Any of these
/// fails initialization; a store is never constructed from a bad document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PGN {pgn} has duplicate field id `{field}`")]
    DuplicateFieldId { pgn: u32, field: String },
    #[error("PGN {pgn} repeating count field `{field}` is not a NUMBER")]
    CountFieldNotNumber { pgn: u32, field: String },
    #[error("PGN {pgn} repeating group starts before its count field")]
    GroupBeforeCountField { pgn: u32 },
    #[error("PGN {pgn} field `{field}`: {reason}")]
    InvalidField {
        pgn: u32,
        field: String,
        reason: &'static str,
    },
    #[error("PGN {pgn} field `{field}` references unknown lookup `{lookup}`")]
    UnknownLookup {
        pgn: u32,
        field: String,
        lookup: String,
    },
}

//==================================================================================DECODE_ERROR

/// Per-message decode failures. The caller receives these alongside the
/// message identity and may log and continue.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No schema entry matches the header PGN (and match fields).
    #[error("decode failed, unknown PGN {pgn}")]
    UnknownPgn { pgn: u32 },
    /// A field failed with something other than a sentinel.
    #[error("failed to decode field `{field}`: {source}")]
    Field {
        field: String,
        #[source]
        source: FieldError,
    },
    /// A lookup field decoded to a non-integer value.
    #[error("enum field `{field}` did not decode to an integer")]
    EnumValueNotInteger { field: String },
    /// INDIRECT_LOOKUP names a field order that was not decoded.
    #[error("enum field `{field}` references missing field order {order}")]
    IndirectFieldMissing { field: String, order: u8 },
}

//==================================================================================GATEWAY_ERROR

/// Gateway I/O and framing failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway i/o failure")]
    Io(#[from] std::io::Error),
    /// The cancellation token fired while a read or write was pending.
    #[error("operation cancelled")]
    Cancelled,
    /// The transport produced no data for longer than the configured
    /// no-data timeout. Recoverable on a live bus; end-of-stream on replay.
    #[error("no data received within idle timeout")]
    IdleTimeout,
    /// The transport reached end of stream (replay file fully consumed).
    #[error("end of stream")]
    Eof,
    /// A frame survived resynchronization but is still malformed.
    #[error("malformed frame: {0}")]
    Frame(String),
    /// The device write failed `max_retries` times in a row.
    #[error("gateway writes failed, retry count reached")]
    WriteRetriesExhausted,
    /// Operation the wire format cannot express (e.g. writing to a log).
    #[error("operation is not supported by this device")]
    Unsupported,
}

//==================================================================================MAPPER_ERROR

/// Address-mapper failures.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("{what} can only be created from PGN {expected}")]
    UnexpectedPgn { what: &'static str, expected: u32 },
    #[error("{what} payload has invalid length {len}")]
    InvalidLength { what: &'static str, len: usize },
    #[error("failed to extract {what}: {source}")]
    Extraction {
        what: &'static str,
        #[source]
        source: FieldError,
    },
    #[error("address mapper process is already running")]
    AlreadyRunning,
    #[error("address mapper request channel closed unexpectedly")]
    RequestChannelClosed,
    /// The run loop observed cancellation and drained out.
    #[error("address mapper cancelled")]
    Cancelled,
}
