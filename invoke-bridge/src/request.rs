//! Requests and their two mutually exclusive outcomes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::diagnostics::Diagnostics;
use crate::error::BridgeError;

/// Command arguments: string keys to JSON values, unvalidated by the client.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for an issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single named command invocation.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub name: String,
    pub args: Args,
}

impl Request {
    pub fn new(name: impl Into<String>, args: Args) -> Self {
        Self {
            id: RequestId::new(),
            name: name.into(),
            args,
        }
    }
}

/// Renders a JSON value the way it would be assigned as element text:
/// strings verbatim, everything else as compact JSON.
fn display_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response(serde_json::Value);

impl Response {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    pub fn display_text(&self) -> String {
        display_text(&self.0)
    }

    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, Failure> {
        serde_json::from_value(self.0).map_err(|e| Failure::from(BridgeError::Json(e)))
    }
}

/// Failed outcome of a request. Opaque: whatever the host rejected with, or
/// the message of a local error that kept the request from completing.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure(serde_json::Value);

impl Failure {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self(serde_json::Value::String(msg.into()))
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_text(&self.0))
    }
}

impl std::error::Error for Failure {}

impl From<BridgeError> for Failure {
    fn from(err: BridgeError) -> Self {
        Self::message(err.to_string())
    }
}

/// Handle to a request in flight.
///
/// Dispatch has already started when this is returned; dropping the handle
/// does not stop it. Await it directly, or attach continuations with
/// [`then`](Self::then) / [`on_outcome`](Self::on_outcome).
pub struct PendingRequest {
    id: RequestId,
    name: String,
    outcome: oneshot::Receiver<Result<Response, Failure>>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl PendingRequest {
    pub(crate) fn new(
        id: RequestId,
        name: String,
        outcome: oneshot::Receiver<Result<Response, Failure>>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            id,
            name,
            outcome,
            diagnostics,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `on_success` with the response; report a failure to the
    /// diagnostics channel instead.
    pub fn then<F>(self, on_success: F) -> JoinHandle<()>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let diagnostics = Arc::clone(&self.diagnostics);
        let name = self.name.clone();
        self.on_outcome(on_success, move |failure| {
            diagnostics.report(&name, &failure)
        })
    }

    /// Attach one continuation per outcome. Exactly one of them runs, once.
    pub fn on_outcome<S, F>(self, on_success: S, on_failure: F) -> JoinHandle<()>
    where
        S: FnOnce(Response) + Send + 'static,
        F: FnOnce(Failure) + Send + 'static,
    {
        tokio::spawn(async move {
            match self.await {
                Ok(response) => on_success(response),
                Err(failure) => on_failure(failure),
            }
        })
    }

    /// Drop interest in the outcome. The host-side action still runs.
    pub fn detach(self) {
        tracing::trace!(request_id = %self.id, command = %self.name, "Request detached");
    }
}

impl Future for PendingRequest {
    type Output = Result<Response, Failure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome.poll_unpin(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::TaskLost.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_response_displays_verbatim() {
        assert_eq!(Response::new(json!("5 processed")).display_text(), "5 processed");
    }

    #[test]
    fn structured_response_displays_as_compact_json() {
        let response = Response::new(json!({"seconds": 3}));
        assert_eq!(response.display_text(), r#"{"seconds":3}"#);
    }

    #[test]
    fn response_deserializes() {
        let n: u64 = Response::new(json!(5)).deserialize().unwrap();
        assert_eq!(n, 5);

        let err = Response::new(json!("five")).deserialize::<u64>().unwrap_err();
        assert!(err.to_string().starts_with("invalid JSON"));
    }

    #[test]
    fn failure_from_bridge_error_carries_message() {
        let failure = Failure::from(BridgeError::EmptyCommand);
        assert_eq!(failure.value(), &json!("command name must not be empty"));
    }

    #[test]
    fn failure_displays_like_response() {
        assert_eq!(Failure::message("bad args").to_string(), "bad args");
        assert_eq!(
            Failure::new(json!({"code": 1})).to_string(),
            r#"{"code":1}"#
        );
    }

    #[tokio::test]
    async fn dropped_sender_resolves_to_failure() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest::new(
            RequestId::new(),
            "lost".to_string(),
            rx,
            Arc::new(crate::diagnostics::TracingDiagnostics),
        );
        drop(tx);

        let failure = pending.await.unwrap_err();
        assert_eq!(failure.to_string(), "request task lost before completing");
    }
}
