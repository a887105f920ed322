//! Plugin lifecycle notifications
//!
//! One-way host -> UI events. The UI layer subscribes; the registry emits
//! after each reconciliation pass and after each plugin load.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::registry::types::{LoadedPlugin, PluginDescriptor};

/// Capacity of the broadcast buffer; slow subscribers lag rather than block.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Plugin lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum PluginEvent {
    /// A discovery pass was reconciled; carries the full descriptor set.
    Discovered(Vec<PluginDescriptor>),
    /// A single plugin's entry point was evaluated; carries runtime fields.
    Loaded(LoadedPlugin),
}

/// Broadcast handle for plugin lifecycle events.
#[derive(Debug, Clone)]
pub struct PluginEvents {
    sender: broadcast::Sender<PluginEvent>,
}

impl PluginEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Events are fire-and-forget; with no subscribers the
    /// event is dropped.
    pub fn emit(&self, event: PluginEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("plugin event dropped: no subscribers");
        }
    }
}

impl Default for PluginEvents {
    fn default() -> Self {
        Self::new()
    }
}
