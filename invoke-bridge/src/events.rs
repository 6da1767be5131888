//! Event delivery on both sides of the bridge.
//!
//! - [`EventBus`]: front-end registry of channel subscriptions. Created once
//!   per process and injected into the client; torn down with `shutdown()`.
//! - [`Emitter`]: host-side broadcaster that commands use to publish events.
//!   Hosts forward what it emits into an `EventBus`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::EventMessage;
use crate::error::BridgeError;

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<serde_json::Value>,
    cancel: CancellationToken,
}

struct BusInner {
    channels: DashMap<String, Vec<Listener>>,
    next_id: AtomicU64,
    /// Parent of every listener token; cancelled on teardown.
    teardown: CancellationToken,
}

impl BusInner {
    fn remove(&self, channel: &str, id: u64) {
        if let Some(mut listeners) = self.channels.get_mut(channel) {
            listeners.retain(|l| l.id != id);
        }
        self.channels.remove_if(channel, |_, listeners| listeners.is_empty());
    }
}

/// Channel subscription registry.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                teardown: CancellationToken::new(),
            }),
        }
    }

    /// Register `handler` for payloads emitted on `channel` from now on.
    ///
    /// Registration is complete when this returns. The handler runs on its own
    /// task, once per payload, in emission order. Must be called within a
    /// Tokio runtime.
    pub fn listen<F>(&self, channel: impl Into<String>, mut handler: F) -> Unsubscribe
    where
        F: FnMut(serde_json::Value) + Send + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.teardown.child_token();

        let token = Unsubscribe {
            channel: channel.clone(),
            id,
            cancel: cancel.clone(),
            bus: Arc::downgrade(&self.inner),
        };

        if cancel.is_cancelled() {
            tracing::debug!(%channel, "Event bus torn down, subscription not registered");
            return token;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .entry(channel.clone())
            .or_default()
            .push(Listener {
                id,
                tx,
                cancel: cancel.clone(),
            });

        tracing::debug!(%channel, subscription = id, "Subscribed");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    payload = rx.recv() => match payload {
                        Some(payload) => handler(payload),
                        None => break,
                    },
                }
            }
            tracing::trace!(%channel, subscription = id, "Delivery task finished");
        });

        token
    }

    /// Queue `payload` for every active listener on `channel`.
    ///
    /// Returns how many listeners it was queued for.
    pub fn emit(&self, channel: &str, payload: serde_json::Value) -> usize {
        let Some(listeners) = self.inner.channels.get(channel) else {
            tracing::trace!(channel, "No listeners for event");
            return 0;
        };

        listeners
            .iter()
            .filter(|l| !l.cancel.is_cancelled())
            .filter(|l| l.tx.send(payload.clone()).is_ok())
            .count()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Cancel every subscription and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.teardown.cancel();
        self.inner.channels.clear();
        tracing::debug!("Event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.teardown.is_cancelled()
    }
}

/// Cancels the subscription it was returned for.
///
/// Dropping the token leaves the subscription active; it lives until
/// [`unsubscribe`](Self::unsubscribe) is called or the bus is torn down.
#[derive(Debug)]
pub struct Unsubscribe {
    channel: String,
    id: u64,
    cancel: CancellationToken,
    bus: Weak<BusInner>,
}

impl Unsubscribe {
    /// Stop future deliveries. Returns `true` if this call ended an active
    /// subscription, `false` if it was already cancelled.
    pub fn unsubscribe(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.channel, self.id);
        }
        tracing::debug!(channel = %self.channel, subscription = self.id, "Unsubscribed");
        true
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner")
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Default number of events buffered per lagging subscriber.
pub const DEFAULT_EMITTER_CAPACITY: usize = 256;

/// Host-side event broadcaster.
#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<EventMessage>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(DEFAULT_EMITTER_CAPACITY)
    }
}

impl Emitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast to every window.
    pub fn emit<T: Serialize>(&self, event: &str, payload: T) -> Result<usize, BridgeError> {
        let payload = serde_json::to_value(payload)?;
        Ok(self.send(EventMessage::broadcast(event, payload)))
    }

    /// Send to the window with label `window` only.
    pub fn emit_to<T: Serialize>(
        &self,
        window: &str,
        event: &str,
        payload: T,
    ) -> Result<usize, BridgeError> {
        let payload = serde_json::to_value(payload)?;
        Ok(self.send(EventMessage::to_window(window, event, payload)))
    }

    fn send(&self, message: EventMessage) -> usize {
        let event = message.event.clone();
        match self.tx.send(message) {
            Ok(receivers) => {
                tracing::trace!(%event, receivers, "Event emitted");
                receivers
            }
            // No receivers is not an error: nobody is listening yet.
            Err(_) => {
                tracing::trace!(%event, "Event emitted with no receivers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
