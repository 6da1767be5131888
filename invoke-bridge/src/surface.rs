//! Named plain-text output surfaces.
//!
//! A surface holds one string that continuations and event handlers replace
//! wholesale, the way the front-end assigns `innerText` on an element.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// One output surface. Clones refer to the same text.
#[derive(Clone)]
pub struct Surface {
    id: Arc<str>,
    text: watch::Sender<String>,
}

impl Surface {
    pub fn new(id: &str) -> Self {
        let (text, _) = watch::channel(String::new());
        Self {
            id: Arc::from(id),
            text,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the whole text.
    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::trace!(surface = %self.id, len = text.len(), "Surface updated");
        self.text.send_replace(text);
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    /// Receiver notified on every `set_text`.
    pub fn watch(&self) -> watch::Receiver<String> {
        self.text.subscribe()
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("text", &*self.text.borrow())
            .finish()
    }
}

/// Surfaces addressed by stable identifiers.
#[derive(Clone, Default)]
pub struct Surfaces {
    surfaces: Arc<DashMap<String, Surface>>,
}

impl Surfaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// The surface with this id, created empty on first use.
    pub fn get_or_create(&self, id: &str) -> Surface {
        self.surfaces
            .entry(id.to_string())
            .or_insert_with(|| Surface::new(id))
            .value()
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Surface> {
        self.surfaces.get(id).map(|s| s.value().clone())
    }

    /// Current text of every surface, sorted by id.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.surfaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().text()))
            .collect()
    }
}
