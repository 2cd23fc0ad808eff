//! SocketCAN frame codec: the 16-byte `can_frame` structure as exchanged
//! with a raw CAN socket the caller has already opened and bound. Only
//! extended-format data frames are accepted; RTR and error frames fail the
//! read.
//!
//! ```text
//! bytes 0-3  CAN id, little endian, flags in the top three bits
//! byte  4    data length
//! bytes 5-7  padding
//! bytes 8-15 data
//! ```

use crate::core::{RawFrame, RawMessage};
use crate::error::GatewayError;
use crate::gateway::{
    read_chunk, write_with_retry, Chunk, GatewayConfig, IdleClock, RawMessageReader,
    RawMessageWriter,
};
use crate::protocol::transport::can_id::{parse_can_id, to_can_id};
use crate::protocol::transport::fast_packet::FastPacketAssembler;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Size of the classic `can_frame` kernel structure.
const FRAME_SIZE: usize = 16;

/// Error message flag (bit 29).
const CAN_ERR_FLAG: u32 = 1 << 29;
/// Remote transmission request flag (bit 30).
const CAN_RTR_FLAG: u32 = 1 << 30;
/// Extended frame format flag (bit 31).
const CAN_EFF_FLAG: u32 = 1 << 31;
/// The 29 identifier bits below the flags.
const CAN_ID_MASK: u32 = 0x1FFF_FFFF;

/// SocketCAN device over any byte transport carrying `can_frame` structs.
pub struct SocketCanDevice<T> {
    transport: T,
    config: GatewayConfig,
    frame_buf: [u8; FRAME_SIZE],
    frame_fill: usize,
    assembler: Option<FastPacketAssembler>,
}

impl<T> SocketCanDevice<T>
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
            frame_buf: [0; FRAME_SIZE],
            frame_fill: 0,
            assembler: None,
        }
    }

    /// Enable Fast Packet reassembly for the schema's fast PGNs.
    pub fn with_assembler(mut self, assembler: FastPacketAssembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Read exactly one 16-byte frame structure, accumulating partial
    /// reads across quanta.
    pub async fn read_raw_frame(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawFrame, GatewayError> {
        let mut idle = IdleClock::new(self.config.receive_data_timeout);
        loop {
            if self.frame_fill == FRAME_SIZE {
                self.frame_fill = 0;
                return parse_socketcan_frame(&self.frame_buf);
            }
            let fill = self.frame_fill;
            match read_chunk(
                &mut self.transport,
                &mut self.frame_buf[fill..],
                cancel,
                self.config.read_quantum,
            )
            .await?
            {
                Chunk::Data(n) => {
                    idle.mark_data();
                    self.frame_fill += n;
                }
                Chunk::Quiet => {
                    if idle.expired() {
                        return Err(GatewayError::IdleTimeout);
                    }
                }
                Chunk::Eof => return Err(GatewayError::Eof),
            }
        }
    }

    /// Send one wire frame with the extended-format flag set.
    pub async fn write_raw_frame(
        &mut self,
        cancel: &CancellationToken,
        frame: &RawFrame,
    ) -> Result<(), GatewayError> {
        let mut buf = [0u8; FRAME_SIZE];
        let can_id = to_can_id(&frame.header) | CAN_EFF_FLAG;
        buf[0..4].copy_from_slice(&can_id.to_le_bytes());
        buf[4] = frame.length.min(8);
        buf[8..8 + frame.payload().len()].copy_from_slice(frame.payload());
        write_with_retry(&mut self.transport, &buf, cancel).await
    }
}

#[async_trait]
impl<T> RawMessageReader for SocketCanDevice<T>
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
        loop {
            let frame = self.read_raw_frame(cancel).await?;
            match &mut self.assembler {
                Some(assembler) => {
                    if let Some(message) = assembler.assemble(&frame) {
                        return Ok(message);
                    }
                }
                None => {
                    return Ok(RawMessage {
                        time: frame.time,
                        header: frame.header,
                        data: frame.payload().to_vec(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        use tokio::io::AsyncWriteExt;
        self.transport.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<T> RawMessageWriter for SocketCanDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_raw_message(
        &mut self,
        cancel: &CancellationToken,
        message: &RawMessage,
    ) -> Result<(), GatewayError> {
        if message.data.len() > 8 {
            return Err(GatewayError::Frame(
                "socketcan writes are single frames of at most 8 bytes".into(),
            ));
        }
        let mut data = [0u8; 8];
        data[..message.data.len()].copy_from_slice(&message.data);
        let frame = RawFrame {
            time: message.time,
            header: message.header,
            length: message.data.len() as u8,
            data,
        };
        self.write_raw_frame(cancel, &frame).await
    }
}

fn parse_socketcan_frame(buf: &[u8; FRAME_SIZE]) -> Result<RawFrame, GatewayError> {
    let raw_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if raw_id & CAN_RTR_FLAG != 0 {
        return Err(GatewayError::Frame(
            "read CAN remote transmission request frame".into(),
        ));
    }
    if raw_id & CAN_ERR_FLAG != 0 {
        return Err(GatewayError::Frame("read CAN error message frame".into()));
    }
    if raw_id & CAN_EFF_FLAG == 0 {
        // Standard 11-bit frames cannot carry an NMEA 2000 header.
        return Err(GatewayError::Frame(
            "read standard frame format on an NMEA 2000 bus".into(),
        ));
    }

    let length = buf[4].min(8);
    let mut data = [0u8; 8];
    data.copy_from_slice(&buf[8..16]);
    Ok(RawFrame {
        time: Utc::now(),
        header: parse_can_id(raw_id & CAN_ID_MASK),
        length,
        data,
    })
}
