//! RCON wire format.
//!
//! Every packet is `len:i32le | id:i32le | type:i32le | body | 0x00 0x00`,
//! where `len` counts everything after itself.

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use crate::error::{AppError, Result};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server echoes when authentication is rejected.
pub const AUTH_FAILED_ID: i32 = -1;

/// id + type + two terminators.
const MIN_PACKET_LEN: i32 = 10;
const MAX_PACKET_LEN: i32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(request_id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let len = body.len() as i32 + MIN_PACKET_LEN;
        let mut buf = Vec::with_capacity(len as usize + 4);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let len = reader.read_i32_le().await?;
        if !(MIN_PACKET_LEN..=MAX_PACKET_LEN).contains(&len) {
            return Err(AppError::protocol(format!("invalid packet length {len}")));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        Self::decode_payload(&payload)
    }

    /// Decode everything after the length prefix.
    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let (header, rest) = payload.split_at(8);
        let request_id = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let kind = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let body = match rest {
            [body @ .., 0, 0] => body,
            _ => return Err(AppError::protocol("packet is missing null terminators")),
        };

        Ok(Self {
            request_id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}
