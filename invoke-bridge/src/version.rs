//! Version information for invoke-bridge.

/// invoke-bridge version from Cargo.toml
pub const INVOKE_BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent by `HttpHost`.
pub fn user_agent() -> String {
    format!("invoke-bridge/{}", INVOKE_BRIDGE_VERSION)
}
