use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::Host;
use crate::command::{CommandRouter, InvokeContext};
use crate::error::BridgeError;
use crate::events::{Emitter, EventBus};
use crate::request::{Failure, Request, Response};

/// Host living in the same process as the client.
pub struct LocalHost {
    router: Arc<CommandRouter>,
    emitter: Emitter,
    window: String,
}

impl LocalHost {
    pub fn new(router: CommandRouter) -> Self {
        Self {
            router: Arc::new(router),
            emitter: Emitter::default(),
            window: "main".to_string(),
        }
    }

    /// Label this front-end presents to commands and event targeting.
    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = window.into();
        self
    }

    /// Emitter handed to commands; also usable to push events directly.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn invoke(&self, request: Request) -> Result<Response, Failure> {
        let ctx = InvokeContext::new(&self.window, &request.name, self.emitter.clone());
        self.router
            .dispatch(ctx, request.args)
            .await
            .map(Response::new)
            .map_err(Failure::new)
    }

    async fn forward_events(&self, bus: EventBus) -> Result<JoinHandle<()>, BridgeError> {
        // Subscribe before spawning so nothing emitted after return is lost.
        let mut rx = self.emitter.subscribe();
        let window = self.window.clone();

        Ok(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) if message.targets(&window) => {
                        bus.emit(&message.event, message.payload);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event forwarder lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
                if bus.is_shut_down() {
                    break;
                }
            }
            tracing::debug!(%window, "Local event forwarding stopped");
        }))
    }
}
