//! HTTP invoke transport: `POST /{window}/{command}` and `GET /{window}/events`.

mod responder;
mod routes;
mod script;
mod server;

pub use responder::{Responder, ResponderError};
pub use routes::{AppState, routes};
pub use script::{ScriptOptions, initialization_script};
pub use server::{BoundServer, InvokeServer, ServerConfig, ShutdownHandle};
