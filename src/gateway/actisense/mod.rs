//! Actisense gateway family: NGT-1/W2K-1 binary framing, the BST-95 EBL
//! log format and the two ASCII formats. Shared here: command constants,
//! the additive checksum and the escape-framed parser both binary formats
//! are built on.

pub mod binary;
pub mod ebl;
pub mod n2k_ascii;
pub mod raw_ascii;

pub use binary::BinaryDevice;
pub use ebl::EblDevice;
pub use n2k_ascii::N2kAsciiDevice;
pub use raw_ascii::RawAsciiDevice;

//==================================================================================Framing bytes

/// Start-of-text marker, sent as `DLE STX`.
pub(crate) const STX: u8 = 0x02;
/// End-of-text marker, sent as `DLE ETX`.
pub(crate) const ETX: u8 = 0x03;
/// Escape byte preceding STX/ETX; doubled when it appears in data.
pub(crate) const DLE: u8 = 0x10;

/// EBL start-of-frame marker, sent as `ESC SOH`.
pub(crate) const SOH: u8 = 0x01;
/// EBL end-of-frame marker, sent as `ESC NL`.
pub(crate) const NL: u8 = 0x0A;
/// EBL escape byte; doubled when it appears in data.
pub(crate) const ESC: u8 = 0x1B;

//==================================================================================Commands

/// Inbound N2K message, NGT binary layout.
pub(crate) const CMD_NGT_MESSAGE_RECEIVED: u8 = 0x93;
/// Outbound N2K message, NGT binary layout.
pub(crate) const CMD_NGT_MESSAGE_SEND: u8 = 0x94;
/// Inbound CAN frame, RAW Actisense layout.
pub(crate) const CMD_RAW_MESSAGE_RECEIVED: u8 = 0x95;
/// Outbound CAN frame, RAW Actisense layout.
pub(crate) const CMD_RAW_MESSAGE_SEND: u8 = 0x96;
/// Inbound N2K message, N2K binary layout (W2K-1).
pub(crate) const CMD_N2K_MESSAGE_RECEIVED: u8 = 0xD0;
/// Outbound N2K message, N2K binary layout (W2K-1).
pub(crate) const CMD_N2K_MESSAGE_SEND: u8 = 0xD1;
/// Inbound gateway-control (BEM) message.
pub(crate) const CMD_DEVICE_MESSAGE_RECEIVED: u8 = 0xA0;
/// Outbound gateway-control (BEM) message.
pub(crate) const CMD_DEVICE_MESSAGE_SEND: u8 = 0xA1;

//==================================================================================Checksum

/// Additive checksum over command, length and data bytes: the CRC byte is
/// chosen so that the sum of everything is 0 modulo 256.
pub(crate) fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// `true` when a frame (command..crc inclusive) sums to zero.
pub(crate) fn checksum_ok(frame: &[u8]) -> bool {
    checksum(frame) == 0
}

//==================================================================================Escape-framed parser

/// States of the unstuffing machine.
///
/// Transition table, with `E` the escape byte, `S` start, `T` terminator:
///
/// | state            | input      | next             | action            |
/// |------------------|------------|------------------|-------------------|
/// | WaitingStart     | E          | WaitingStart*    | remember escape   |
/// | WaitingStart*    | S          | Reading          | begin frame       |
/// | WaitingStart*    | other      | WaitingStart     | drop              |
/// | Reading          | E          | EscapePending    |                   |
/// | Reading          | other      | Reading          | append            |
/// | EscapePending    | E          | Reading          | append single E   |
/// | EscapePending    | T          | WaitingStart     | frame complete    |
/// | EscapePending    | other      | WaitingStart     | discard frame     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    WaitingStart { escape_seen: bool },
    Reading,
    EscapePending,
}

/// Byte-unstuffing parser shared by the DLE/STX (binary) and ESC/SOH (EBL)
/// framings. Feed bytes one at a time; a completed frame body is returned
/// with the framing and escapes removed.
pub(crate) struct EscapedFrameParser {
    escape: u8,
    start: u8,
    terminator: u8,
    state: ParserState,
    message: Vec<u8>,
}

impl EscapedFrameParser {
    pub(crate) fn new(escape: u8, start: u8, terminator: u8, capacity: usize) -> Self {
        Self {
            escape,
            start,
            terminator,
            state: ParserState::WaitingStart { escape_seen: false },
            message: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            ParserState::WaitingStart { escape_seen } => {
                self.state = if escape_seen && byte == self.start {
                    self.message.clear();
                    ParserState::Reading
                } else {
                    ParserState::WaitingStart {
                        escape_seen: byte == self.escape,
                    }
                };
                None
            }
            ParserState::Reading => {
                if byte == self.escape {
                    self.state = ParserState::EscapePending;
                } else {
                    self.message.push(byte);
                }
                None
            }
            ParserState::EscapePending => {
                if byte == self.escape {
                    // Doubled escape: one literal escape byte of data.
                    self.message.push(byte);
                    self.state = ParserState::Reading;
                    return None;
                }
                self.state = ParserState::WaitingStart { escape_seen: false };
                if byte == self.terminator {
                    return Some(std::mem::take(&mut self.message));
                }
                // Unknown escape sequence: drop the frame and resync.
                tracing::trace!(byte, "unknown escape sequence, resynchronizing");
                self.message.clear();
                None
            }
        }
    }
}
