//! Transport layer for the host side of the bridge.
//!
//! Currently provides the HTTP invoke server via axum; the matching client is
//! `host::HttpHost`.

pub mod http;

pub use http::{BoundServer, InvokeServer, ServerConfig, ShutdownHandle};
