//! Routes command outcomes back to the HTTP request waiting for them.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::bridge::protocol::{CallbackId, InvokeResponse};

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("callback {0} is already pending")]
    AlreadyPending(CallbackId),
}

/// Callback id -> waiting request.
///
/// Each id resolves at most once; a second `respond` for the same id finds
/// nothing and is dropped.
#[derive(Default)]
pub struct Responder {
    pending: DashMap<CallbackId, oneshot::Sender<InvokeResponse>>,
}

impl Responder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id` and get the receiver its outcome will arrive on.
    pub fn register(
        &self,
        id: CallbackId,
    ) -> Result<oneshot::Receiver<InvokeResponse>, ResponderError> {
        match self.pending.entry(id) {
            Entry::Occupied(entry) => Err(ResponderError::AlreadyPending(entry.key().clone())),
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Deliver `response` to whoever registered `id`.
    ///
    /// Returns false if nothing was waiting: the id was never registered,
    /// was already answered, or its HTTP request went away.
    pub fn respond(&self, id: &CallbackId, response: InvokeResponse) -> bool {
        let Some((_, tx)) = self.pending.remove(id) else {
            tracing::warn!(callback = %id, "No pending request for callback");
            return false;
        };
        tx.send(response).is_ok()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
