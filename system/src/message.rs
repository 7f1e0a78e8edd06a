use crate::error::ProtocolError;
use crate::types::{ConnectionId, CursorMap, Point, Stroke};
use serde::{Deserialize, Serialize};

/// Client -> server on the drawing channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DrawingCommand {
    Draw {
        #[serde(rename = "stroke")]
        points: Vec<Point>,
        username: String,
        color: String,
    },
    Undo,
    Redo,
    Cursor {
        username: String,
        x: f64,
        y: f64,
        color: String,
    },
    Clear,
}

impl DrawingCommand {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Server -> client on the drawing channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DrawingEvent {
    /// Full replacement of the client's history.
    History { drawings: Vec<Stroke> },
    /// A single stroke appended to the tail.
    Draw(Stroke),
    CursorUpdate { users: CursorMap },
    Clear,
}

impl DrawingEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Server -> client text messages on the audio channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AudioEvent {
    Id { id: ConnectionId },
}

impl AudioEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
