//! CanBoat text format: the plain replay representation used by canboat
//! tooling, one message per line:
//!
//! ```text
//! 2023-02-07T11:55:11.002803898+02:00,2,127245,13,255,8,ff,07,ff,7f,00,00,ff,ff
//! ```
//!
//! Lines starting with `#` and empty lines are skipped. Unlike the live
//! gateway formats the timestamp is part of the record, so replayed
//! messages keep their original wall-clock time.

use crate::core::{CanBusHeader, RawMessage};
use crate::error::GatewayError;
use crate::gateway::{
    read_line_message, write_with_retry, GatewayConfig, LineReader, RawMessageReader,
    RawMessageWriter,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// CanBoat text reader/writer over any byte transport.
pub struct CanBoatDevice<T> {
    transport: T,
    config: GatewayConfig,
    lines: LineReader,
}

impl<T> CanBoatDevice<T>
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
impl<T> RawMessageReader for CanBoatDevice<T>
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
            |line| {
                let text = std::str::from_utf8(line)
                    .map_err(|_| GatewayError::Frame("canboat line is not utf-8".into()))?;
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return Ok(None);
                }
                unmarshal_line(trimmed).map(Some)
            },
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
impl<T> RawMessageWriter for CanBoatDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_raw_message(
        &mut self,
        cancel: &CancellationToken,
        message: &RawMessage,
    ) -> Result<(), GatewayError> {
        let mut line = marshal_raw_message(message);
        line.push('\n');
        write_with_retry(&mut self.transport, line.as_bytes(), cancel).await
    }
}

//==================================================================================Record codec

/// Parse `time,prio,pgn,src,dst,len,hh,hh,...`.
pub fn unmarshal_line(line: &str) -> Result<RawMessage, GatewayError> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 7 {
        return Err(GatewayError::Frame(
            "canboat record has fewer components than expected".into(),
        ));
    }

    let declared_len: usize = parts[5]
        .parse()
        .map_err(|_| GatewayError::Frame("canboat record has invalid data length".into()))?;
    if parts.len() - 6 != declared_len {
        return Err(GatewayError::Frame(
            "canboat record data length does not match byte count".into(),
        ));
    }

    let time = DateTime::parse_from_rfc3339(parts[0])
        .map_err(|e| GatewayError::Frame(format!("canboat record has invalid time: {e}")))?
        .with_timezone(&Utc);
    let priority: u8 = parts[1]
        .parse()
        .map_err(|_| GatewayError::Frame("canboat record has invalid priority".into()))?;
    let pgn: u32 = parts[2]
        .parse()
        .map_err(|_| GatewayError::Frame("canboat record has invalid pgn".into()))?;
    let source: u8 = parts[3]
        .parse()
        .map_err(|_| GatewayError::Frame("canboat record has invalid source".into()))?;
    let destination: u8 = parts[4]
        .parse()
        .map_err(|_| GatewayError::Frame("canboat record has invalid destination".into()))?;

    let data = hex::decode(parts[6..].concat())
        .map_err(|e| GatewayError::Frame(format!("canboat record data bytes: {e}")))?;

    Ok(RawMessage {
        time,
        header: CanBusHeader {
            pgn,
            priority,
            source,
            destination,
        },
        data,
    })
}

/// Render a message as one CanBoat text record (no trailing newline).
pub fn marshal_raw_message(message: &RawMessage) -> String {
    let mut line = String::with_capacity(40 + message.data.len() * 3);
    let _ = write!(
        line,
        "{},{},{},{},{},{}",
        message.time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        message.header.priority,
        message.header.pgn,
        message.header.source,
        message.header.destination,
        message.data.len()
    );
    for b in &message.data {
        let _ = write!(line, ",{b:02x}");
    }
    line
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
