//! Launch report sent by the capture process once the target is started
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! +-------+--------+------------+---------+---------+
//! | CEXP  | status | target pid | msg len | message |
//! | 4 B   | u8     | u32        | u16     | msg len |
//! +-------+--------+------------+---------+---------+
//! ```

use super::{ByteChannel, Connection};
use crate::result::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

const MAGIC: &[u8; 4] = b"CEXP";
const HEADER_LEN: usize = 4 + 1 + 4 + 2;

const STATUS_LAUNCHED: u8 = 0;
const STATUS_FAILED: u8 = 1;

/// What the capture process reports after trying to launch the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hello {
    /// The target is running
    Launched {
        /// Process id of the target program
        target_pid: u32,
    },
    /// The target could not be started
    Failed {
        /// Human-readable reason
        reason: String,
    },
}

impl Hello {
    /// Serialize into a frame.
    pub fn encode(&self) -> Bytes {
        let (status, pid, message) = match self {
            Hello::Launched { target_pid } => (STATUS_LAUNCHED, *target_pid, &[][..]),
            Hello::Failed { reason } => (STATUS_FAILED, 0, reason.as_bytes()),
        };
        let message = &message[..message.len().min(u16::MAX as usize)];

        let mut frame = BytesMut::with_capacity(HEADER_LEN + message.len());
        frame.put_slice(MAGIC);
        frame.put_u8(status);
        frame.put_u32_le(pid);
        frame.put_u16_le(message.len() as u16);
        frame.put_slice(message);
        frame.freeze()
    }

    /// Parse the fixed-size header into status, pid and message length.
    fn decode_header(mut header: &[u8]) -> Result<(u8, u32, usize), TransportError> {
        if header.len() < HEADER_LEN {
            return Err(TransportError::Handshake(format!(
                "short header ({} bytes)",
                header.len()
            )));
        }
        if &header[..4] != MAGIC {
            return Err(TransportError::Handshake("bad magic".to_string()));
        }
        header.advance(4);
        let status = header.get_u8();
        let pid = header.get_u32_le();
        let len = header.get_u16_le() as usize;
        Ok((status, pid, len))
    }

    fn from_parts(status: u8, pid: u32, message: &[u8]) -> Result<Self, TransportError> {
        match status {
            STATUS_LAUNCHED => Ok(Hello::Launched { target_pid: pid }),
            STATUS_FAILED => Ok(Hello::Failed {
                reason: String::from_utf8_lossy(message).into_owned(),
            }),
            other => Err(TransportError::Handshake(format!("unknown status {other}"))),
        }
    }

    /// Parse a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        let (status, pid, len) = Self::decode_header(frame)?;
        let message = frame
            .get(HEADER_LEN..HEADER_LEN + len)
            .ok_or_else(|| TransportError::Handshake("truncated message".to_string()))?;
        Self::from_parts(status, pid, message)
    }

    /// Send this report over `conn`.
    pub async fn write(&self, conn: &mut Connection) -> Result<(), TransportError> {
        conn.send(&self.encode()).await
    }

    /// Read the report from `conn`, waiting no longer than `wait` per part.
    pub async fn read(conn: &mut Connection, wait: Duration) -> Result<Self, TransportError> {
        let header = conn.receive_exact(HEADER_LEN, wait).await?;
        let (status, pid, len) = Self::decode_header(&header)?;
        let message = if len > 0 {
            conn.receive_exact(len, wait).await?
        } else {
            Vec::new()
        };
        Self::from_parts(status, pid, &message)
    }
}
