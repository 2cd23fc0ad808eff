//! Actisense W2K-1 "NMEA 2000 ASCII" format. One message per line, with
//! Fast Packet and ISO-TP assembly already done by the gateway:
//!
//! ```text
//! A<hhmmss.sss> <SSDDP> <PPPPP> <data-hex>\n
//! ```
//!
//! `SS`/`DD` are source and destination hex pairs, `P` a single priority
//! digit, `PPPPP` a five-hex-digit PGN; the payload is an unspaced hex
//! string of up to 3570 characters (an assembled ISO-TP transfer).

use crate::core::{CanBusHeader, RawMessage};
use crate::error::GatewayError;
use crate::gateway::{
    read_line_message, GatewayConfig, LineReader, RawMessageReader, RawMessageWriter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// N2K ASCII reader over any byte transport.
pub struct N2kAsciiDevice<T> {
    transport: T,
    config: GatewayConfig,
    lines: LineReader,
}

impl<T> N2kAsciiDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, GatewayConfig::default())
    }

    pub fn with_config(transport: T, config: GatewayConfig) -> Self {
        Self {
            transport,
            config,
            lines: LineReader::new(),
        }
    }
}

#[async_trait]
impl<T> RawMessageReader for N2kAsciiDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn initialize(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn read_raw_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawMessage, GatewayError> {
        read_line_message(
            &mut self.transport,
            &mut self.lines,
            cancel,
            &self.config,
            |line| parse_n2k_ascii(line, Utc::now()),
        )
        .await
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        use tokio::io::AsyncWriteExt;
        self.transport.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<T> RawMessageWriter for N2kAsciiDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// The W2K-1 does not accept this format inbound.
    async fn write_raw_message(
        &mut self,
        _cancel: &CancellationToken,
        _message: &RawMessage,
    ) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported)
    }
}

/// Parse one line. `Ok(None)` skips wire garbage before the next `A`
/// record; a structurally broken record is an error.
fn parse_n2k_ascii(
    line: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<RawMessage>, GatewayError> {
    if line.first() != Some(&b'A') {
        // Mid-stream garbage; resync at the next line starting with A.
        return Ok(None);
    }
    // Shortest valid record: one data byte with second-precision time.
    if line.len() < 22 {
        return Ok(None);
    }

    // Time block directly after the A; not mapped to wall-clock because the
    // gateway clock is unsynchronized.
    let mut time_end = 0;
    for (i, &b) in line.iter().enumerate().skip(1) {
        if !b.is_ascii_digit() && b != b'.' {
            break;
        }
        time_end = i;
    }
    if time_end == 0 {
        return Err(GatewayError::Frame("n2k ascii record missing time block".into()));
    }

    let (header_start, header_end) = next_hex_block(line, time_end + 1).ok_or_else(|| {
        GatewayError::Frame("n2k ascii record missing source,destination,priority block".into())
    })?;
    if header_end - header_start + 1 != 5 {
        return Err(GatewayError::Frame(
            "n2k ascii record header block is not 5 characters".into(),
        ));
    }
    let source = parse_hex_u32(&line[header_start..header_start + 2])? as u8;
    let destination = parse_hex_u32(&line[header_start + 2..header_start + 4])? as u8;
    let priority = line[header_start + 4] - b'0';

    let (pgn_start, pgn_end) = next_hex_block(line, header_end + 1).ok_or_else(|| {
        GatewayError::Frame("n2k ascii record missing pgn block".into())
    })?;
    let pgn = parse_hex_u32(&line[pgn_start..=pgn_end])?;

    let (data_start, data_end) = next_hex_block(line, pgn_end + 1).ok_or_else(|| {
        GatewayError::Frame("n2k ascii record missing data block".into())
    })?;
    let data = hex::decode(&line[data_start..=data_end])
        .map_err(|e| GatewayError::Frame(format!("n2k ascii record data block: {e}")))?;

    Ok(Some(RawMessage {
        time: now,
        header: CanBusHeader {
            pgn,
            priority,
            source,
            destination,
        },
        data,
    }))
}

/// Locate the next run of hexadecimal characters from `from`, inclusive
/// bounds. `None` when the line ends first.
fn next_hex_block(line: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut start = None;
    let mut end = None;
    for (i, &b) in line.iter().enumerate().skip(from) {
        if b.is_ascii_hexdigit() {
            if start.is_none() {
                start = Some(i);
            }
            end = Some(i);
        } else if end.is_some() {
            break;
        }
    }
    Some((start?, end?))
}

fn parse_hex_u32(text: &[u8]) -> Result<u32, GatewayError> {
    let s = std::str::from_utf8(text)
        .map_err(|_| GatewayError::Frame("hex block is not ascii".into()))?;
    u32::from_str_radix(s, 16)
        .map_err(|e| GatewayError::Frame(format!("invalid hex block `{s}`: {e}")))
}

#[cfg(test)]
#[path = "n2k_ascii_tests.rs"]
mod tests;
