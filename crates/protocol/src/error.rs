//! Parse-time protocol errors.

use thiserror::Error;

/// Errors produced while decoding a command frame.
///
/// Every variant maps to a `success=false` response written back on the
/// same connection; none of them terminate the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a JSON object at all.
    #[error("failed to parse command: {0}")]
    Malformed(String),

    /// The frame decoded but carried no `id`.
    #[error("command missing id")]
    MissingId,

    /// The frame decoded but carried no `action`.
    #[error("command missing action")]
    MissingAction,

    /// The `action` is not in the supported action table.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The action is known but its payload failed to decode.
    #[error("failed to parse {action} command: {message}")]
    InvalidPayload { action: String, message: String },
}
