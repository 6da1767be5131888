//! Wire protocol types shared by the HTTP invoke server and `HttpHost`.
//!
//! Two directions:
//! - **Invoke** (`POST /{window}/{command}`): `InvokePayload` in, the JSON
//!   value of an `InvokeResponse` out (status 200 for `Ok`, 400 for `Err`)
//! - **Events** (`GET /{window}/events`): length-delimited `EventMessage` frames

use serde::{Deserialize, Serialize};

use crate::request::Args;

/// Identifier the server uses to route a command reply back to its request.
///
/// Webview shims send whatever string they use as their callback name, so this
/// is an opaque string rather than a parsed UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
    /// Fresh random id (UUID v4).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CallbackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of an invoke request.
///
/// Command arguments are flattened into the top-level object next to the
/// routing fields, so `{args: 5}` travels as
/// `{"cmd": "test_command", "callback": "..", "error": "..", "args": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokePayload {
    /// Command name. The server routes on the URL path, this is informational.
    #[serde(default)]
    pub cmd: String,
    /// Callback invoked with the reply on success.
    pub callback: CallbackId,
    /// Callback invoked with the reply on failure.
    pub error: CallbackId,
    #[serde(flatten)]
    pub args: Args,
}

impl InvokePayload {
    pub fn new(cmd: impl Into<String>, args: Args) -> Self {
        Self {
            cmd: cmd.into(),
            callback: CallbackId::new(),
            error: CallbackId::new(),
            args,
        }
    }
}

/// Outcome of a command on the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResponse {
    Ok(serde_json::Value),
    Err(serde_json::Value),
}

impl InvokeResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// HTTP status the server replies with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ok(_) => 200,
            Self::Err(_) => 400,
        }
    }

    pub fn into_result(self) -> Result<serde_json::Value, serde_json::Value> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
        }
    }

    /// The JSON value sent as the response body, regardless of outcome.
    pub fn into_body(self) -> serde_json::Value {
        match self {
            Self::Ok(v) | Self::Err(v) => v,
        }
    }
}

impl From<Result<serde_json::Value, serde_json::Value>> for InvokeResponse {
    fn from(result: Result<serde_json::Value, serde_json::Value>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}

/// Event broadcast by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Channel name.
    pub event: String,
    /// Target window label; `None` reaches every window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn broadcast(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            window: None,
            payload,
        }
    }

    pub fn to_window(
        window: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event: event.into(),
            window: Some(window.into()),
            payload,
        }
    }

    /// Whether a window with this label should receive the event.
    pub fn targets(&self, window: &str) -> bool {
        self.window.as_deref().is_none_or(|w| w == window)
    }
}
