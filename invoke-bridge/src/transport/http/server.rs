//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::responder::Responder;
use super::routes::{AppState, routes};
use super::script::{ScriptOptions, initialization_script};
use crate::command::CommandRouter;
use crate::events::Emitter;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// 0 lets the OS pick an unused port.
    pub port: u16,
    /// Origins echoed back in `Access-Control-Allow-Origin`.
    pub allowed_origins: Vec<String>,
    /// Window labels accepted as the first path segment.
    pub windows: Vec<String>,
    /// If false, only an explicit `ShutdownHandle` stops the server.
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: Vec::new(),
            windows: vec!["main".to_string()],
            handle_signals: true,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        let window = window.into();
        if !self.windows.contains(&window) {
            self.windows.push(window);
        }
        self
    }

    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }
}

/// Stops a running server. Cloneable; any clone works.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Command host served over HTTP, not yet bound.
pub struct InvokeServer {
    config: ServerConfig,
    router: Arc<CommandRouter>,
    emitter: Emitter,
    responder: Arc<Responder>,
}

impl InvokeServer {
    pub fn new(config: ServerConfig, router: CommandRouter) -> Self {
        Self {
            config,
            router: Arc::new(router),
            emitter: Emitter::default(),
            responder: Arc::new(Responder::new()),
        }
    }

    /// Emitter whose events are streamed to connected windows.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub async fn bind(self) -> anyhow::Result<BoundServer> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(
            self.router,
            self.emitter.clone(),
            self.responder,
            self.config.allowed_origins.clone(),
            self.config.windows.clone(),
            shutdown_rx,
        );

        info!(%local_addr, "Invoke server bound");
        Ok(BoundServer {
            listener,
            local_addr,
            handle_signals: self.config.handle_signals,
            state,
            emitter: self.emitter,
            shutdown: ShutdownHandle {
                tx: Arc::new(shutdown_tx),
            },
        })
    }
}

/// A server holding its listening socket, ready to serve.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handle_signals: bool,
    state: AppState,
    emitter: Emitter,
    shutdown: ShutdownHandle,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Script to inject into webviews so they invoke through this server.
    pub fn initialization_script(&self) -> String {
        initialization_script(self.port(), &ScriptOptions::default())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shut down by handle or signal.
    pub async fn serve(self) -> anyhow::Result<()> {
        let app = routes(self.state);
        let tx = Arc::clone(&self.shutdown.tx);
        let shutdown_rx = tx.subscribe();
        let handle_signals = self.handle_signals;

        info!("Starting invoke server on {}", self.local_addr);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal(handle_signals, shutdown_rx).await;
                // Open event streams end on this, letting graceful shutdown finish.
                tx.send_replace(true);
            })
            .await?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Spawn [`serve`](Self::serve) onto the runtime.
    pub fn start(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.serve())
    }
}

/// Wait for SIGINT, SIGTERM (when `handle_signals`), or an explicit shutdown.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// Tokio runtime is misconfigured. That is a startup error worth failing on.
async fn shutdown_signal(handle_signals: bool, mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        if handle_signals {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        } else {
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        if handle_signals {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        } else {
            std::future::pending::<()>().await
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        if shutdown_rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested via handle...");
        }
    }
}
