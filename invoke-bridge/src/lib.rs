//! invoke-bridge: async command/event bridge between a front-end and its host.

mod client;
mod diagnostics;
mod error;
mod request;
mod surface;
mod version;

pub mod bridge;
pub mod command;
pub mod events;
pub mod frontend;
pub mod host;
pub mod telemetry;
pub mod transport;

pub use client::BridgeClient;
pub use command::{CommandHandler, CommandRouter, InvokeContext, parse_arg};
pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use error::BridgeError;
pub use events::{Emitter, EventBus, Unsubscribe};
pub use host::{ClientConfig, Host, HttpHost, LocalHost};
pub use request::{Args, Failure, PendingRequest, Request, RequestId, Response};
pub use surface::{Surface, Surfaces};
pub use transport::{BoundServer, InvokeServer, ServerConfig, ShutdownHandle};
pub use version::{INVOKE_BRIDGE_VERSION, user_agent};
