//! Wire framing for the TCP bus.
//!
//! Each frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! encoding of a [`Frame`]:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Control frames (`hello`, `request_name`, `add_match`) are answered in
//! order by the daemon; `message` frames flow in both directions at any time.

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::message::{Message, RequestNameReply};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Hello,
    Welcome { unique_name: String },
    RequestName { name: String },
    NameReply { reply: RequestNameReply },
    /// Match rule in its textual form.
    AddMatch { rule: String },
    MatchAdded,
    Fault { message: String },
    Message { message: Message },
}

/// Read one frame. Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > BusConfig::MAX_FRAME_SIZE {
        return Err(BusError::protocol(format!(
            "frame size {} exceeds maximum {}",
            len,
            BusConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let frame = serde_json::from_slice(&payload).map_err(|e| BusError::Json {
        message: format!("Failed to parse frame: {}", e),
        source: Some(e),
    })?;
    Ok(Some(frame))
}

/// Write one frame. The caller decides when to flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > BusConfig::MAX_FRAME_SIZE {
        return Err(BusError::send(format!(
            "frame size {} exceeds maximum {}",
            payload.len(),
            BusConfig::MAX_FRAME_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    Ok(())
}
