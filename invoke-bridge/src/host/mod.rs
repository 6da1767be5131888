//! The collaborator that executes commands and broadcasts events.
//!
//! - **LocalHost**: in-process dispatch to a `CommandRouter`
//! - **HttpHost**: the HTTP invoke protocol served by `transport::http`

mod http;
mod local;

pub use http::{ClientConfig, HttpHost};
pub use local::LocalHost;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::BridgeError;
use crate::events::EventBus;
use crate::request::{Failure, Request, Response};

/// Command execution and event source behind a `BridgeClient`.
///
/// This abstraction lets the client run against a remote process, an
/// in-process router, or a test double without changing call sites.
#[async_trait]
pub trait Host: Send + Sync {
    /// Execute one request. Local errors surface as a `Failure`.
    async fn invoke(&self, request: Request) -> Result<Response, Failure>;

    /// Re-emit host events addressed to this front-end into `bus` until the
    /// host goes away.
    ///
    /// Resolves once the host-side subscription exists: events emitted after
    /// this returns are not missed. The returned task does the forwarding.
    async fn forward_events(&self, bus: EventBus) -> Result<JoinHandle<()>, BridgeError>;
}
