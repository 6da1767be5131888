use thiserror::Error;

/// Errors raised inside the bridge before a command reaches, or after it
/// leaves, the host. Callers only ever see these folded into a
/// [`Failure`](crate::Failure).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("command name must not be empty")]
    EmptyCommand,

    #[error("request to host failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("host responded with {0}")]
    Status(u16),

    #[error("request task lost before completing")]
    TaskLost,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
