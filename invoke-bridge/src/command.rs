//! Host-side command registry.
//!
//! Commands are async handlers keyed by name. Each call gets an
//! [`InvokeContext`] (which window asked, which command, and an [`Emitter`]
//! for publishing events) plus the raw argument map, and answers with
//! `Ok(value)` or `Err(value)`; both values travel to the caller verbatim.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::events::Emitter;
use crate::request::Args;

/// Per-call information handed to a command.
#[derive(Clone)]
pub struct InvokeContext {
    window: String,
    command: String,
    emitter: Emitter,
}

impl InvokeContext {
    pub fn new(window: impl Into<String>, command: impl Into<String>, emitter: Emitter) -> Self {
        Self {
            window: window.into(),
            command: command.into(),
            emitter,
        }
    }

    /// Label of the window that issued the command.
    pub fn window(&self) -> &str {
        &self.window
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

/// An async command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: InvokeContext,
        args: Args,
    ) -> Result<serde_json::Value, serde_json::Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(InvokeContext, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, serde_json::Value>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: InvokeContext,
        args: Args,
    ) -> Result<serde_json::Value, serde_json::Value> {
        (self.0)(ctx, args).await
    }
}

/// Name -> handler table.
#[derive(Clone, Default)]
pub struct CommandRouter {
    commands: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure as a command. Replaces any previous command
    /// with the same name.
    pub fn command<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(InvokeContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, serde_json::Value>> + Send + 'static,
    {
        self.handler(name, FnHandler(f))
    }

    pub fn handler(mut self, name: impl Into<String>, handler: impl CommandHandler) -> Self {
        let name = name.into();
        if self.commands.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(command = %name, "Command registered twice, keeping the last one");
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the command named by `ctx`.
    pub async fn dispatch(
        &self,
        ctx: InvokeContext,
        args: Args,
    ) -> Result<serde_json::Value, serde_json::Value> {
        let Some(handler) = self.commands.get(ctx.command()).cloned() else {
            tracing::debug!(command = %ctx.command(), "Unknown command");
            return Err(serde_json::Value::String(format!(
                "command {} not found",
                ctx.command()
            )));
        };

        tracing::debug!(command = %ctx.command(), window = %ctx.window(), "Dispatching command");
        handler.call(ctx, args).await
    }
}

/// Extract and deserialize argument `key` for the command in `ctx`.
///
/// The error is ready to be returned from a command as its rejection value.
pub fn parse_arg<T: DeserializeOwned>(
    ctx: &InvokeContext,
    args: &Args,
    key: &str,
) -> Result<T, serde_json::Value> {
    let invalid = |reason: String| {
        serde_json::Value::String(format!(
            "invalid args `{key}` for command `{}`: {reason}",
            ctx.command()
        ))
    };

    let value = args
        .get(key)
        .ok_or_else(|| invalid(format!("command {} missing required key {key}", ctx.command())))?;

    serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))
}
