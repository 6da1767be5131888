//! BridgeClient: issues commands to a host and subscribes to its events.
//!
//! The client never blocks. `issue` starts dispatch on a spawned task and
//! hands back a [`PendingRequest`]; `subscribe` registers on the injected
//! [`EventBus`] and returns at once. Outcomes and deliveries run as tasks on
//! the caller's Tokio runtime, so on a current-thread runtime everything is
//! cooperatively scheduled on one thread.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::error::BridgeError;
use crate::events::{EventBus, Unsubscribe};
use crate::host::Host;
use crate::request::{Args, PendingRequest, Request};

#[derive(Clone)]
pub struct BridgeClient {
    host: Arc<dyn Host>,
    events: EventBus,
    diagnostics: Arc<dyn Diagnostics>,
}

impl BridgeClient {
    /// Client over `host`, subscribing through `events`.
    ///
    /// Failures that reach [`PendingRequest::then`] are logged through
    /// `tracing` until [`with_diagnostics`](Self::with_diagnostics) says
    /// otherwise.
    pub fn new(host: Arc<dyn Host>, events: EventBus) -> Self {
        Self {
            host,
            events,
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.diagnostics
    }

    /// Send `name` with `args` to the host.
    ///
    /// Resolves to exactly one `Response` or `Failure`. An empty name fails
    /// without contacting the host. Must be called within a Tokio runtime.
    pub fn issue(&self, name: impl Into<String>, args: Args) -> PendingRequest {
        let request = Request::new(name, args);
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest::new(
            request.id,
            request.name.clone(),
            rx,
            Arc::clone(&self.diagnostics),
        );

        if request.name.is_empty() {
            tracing::debug!(request_id = %request.id, "Rejecting request with empty command name");
            let _ = tx.send(Err(BridgeError::EmptyCommand.into()));
            return pending;
        }

        tracing::debug!(request_id = %request.id, command = %request.name, "Issuing request");
        let host = Arc::clone(&self.host);
        tokio::spawn(async move {
            let id = request.id;
            let outcome = host.invoke(request).await;
            match &outcome {
                Ok(_) => tracing::trace!(request_id = %id, "Request succeeded"),
                Err(failure) => tracing::trace!(request_id = %id, %failure, "Request failed"),
            }
            // Receiver gone means nobody is interested; the host action still ran.
            let _ = tx.send(outcome);
        });

        pending
    }

    /// Send `name` without arguments for its side effect; the outcome is
    /// discarded.
    pub fn issue_detached(&self, name: impl Into<String>) {
        self.issue(name, Args::new()).detach();
    }

    /// Run `handler` for every payload the host broadcasts on `channel` from
    /// now on, until the returned token is invoked.
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: FnMut(serde_json::Value) + Send + 'static,
    {
        self.events.listen(channel, handler)
    }
}
