//! Server-push subscriptions and connectivity notifications
//!
//! Subscriptions live in the [`EventHub`], not on the socket, so they
//! survive reconnects. Every channel state transition emits an `online` or
//! `offline` event to subscribers and publishes a transient
//! [`Notification`] for whatever UI is listening.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use webtop_core::ConnectionState;

/// Handle returned by [`EventHub::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the event payload
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// User-visible connectivity notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    ConnectionLost,
    ConnectionRestored,
    ReconnectFailed { attempt: u32 },
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::ConnectionLost => write!(f, "Connection lost"),
            Notification::ConnectionRestored => write!(f, "Connection restored"),
            Notification::ReconnectFailed { attempt } => {
                write!(f, "Reconnect failed (attempt {})", attempt)
            }
        }
    }
}

struct HubInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    notify_tx: broadcast::Sender<Notification>,
}

/// Named-event subscription registry shared by a channel and its owners
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
                notify_tx,
            }),
        }
    }

    /// Register a handler for a named event
    pub fn subscribe<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("subscribed {:?} to {}", id, event);
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Number of handlers registered for an event
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for `event`
    pub fn emit(&self, event: &str, payload: &Value) {
        // Handlers may subscribe or unsubscribe; never call them under the lock.
        let handlers: Vec<EventHandler> = match self.inner.handlers.read().get(event) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            handler(payload);
        }
    }

    /// Receive transient connectivity notifications
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notify_tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        info!("{}", notification);
        let _ = self.inner.notify_tx.send(notification);
    }

    /// Announce a channel state transition to subscribers
    pub fn transition(&self, state: ConnectionState, attempt: u32) {
        self.emit(state.event_name(), &json!({ "attempt": attempt }));
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
