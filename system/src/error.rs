use thiserror::Error;

/// Failures while decoding or encoding anything that crosses the wire.
///
/// None of these are fatal to a connection; callers log and drop the message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("audio frame has no header delimiter")]
    MissingDelimiter,
}
