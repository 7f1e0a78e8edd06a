//! Framing for relayed audio.
//!
//! A relayed frame is a UTF-8 JSON header, one `\n` byte, then the sender's
//! payload exactly as it arrived. Receivers split on the first `\n` only; the
//! payload is raw PCM and may itself contain that byte.

use crate::error::ProtocolError;
use crate::types::ConnectionId;
use serde::{Deserialize, Serialize};

pub const HEADER_DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioHeader {
    pub sender: ConnectionId,
}

pub fn encode_frame(sender: ConnectionId, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let header = serde_json::to_vec(&AudioHeader { sender })?;
    let mut frame = Vec::with_capacity(header.len() + 1 + payload.len());
    frame.extend_from_slice(&header);
    frame.push(HEADER_DELIMITER);
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub fn decode_frame(frame: &[u8]) -> Result<(AudioHeader, &[u8]), ProtocolError> {
    let split = frame
        .iter()
        .position(|b| *b == HEADER_DELIMITER)
        .ok_or(ProtocolError::MissingDelimiter)?;
    let header = serde_json::from_slice(&frame[..split])?;
    Ok((header, &frame[split + 1..]))
}
