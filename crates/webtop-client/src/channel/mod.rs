//! Connection channels to the application server
//!
//! Two interchangeable strategies implement [`Channel`]:
//! - [`HttpChannel`]: stateless, one HTTP exchange per call, online state
//!   driven by an injected [`ConnectivitySignal`]
//! - [`SocketChannel`]: one persistent WebSocket, calls multiplexed by
//!   correlation id, automatic reconnect with backoff
//!
//! ```text
//! Disconnected ──init──► Connecting ──ok──► Connected ──close──► Reconnecting
//!      ▲                     │                  ▲                  │   ▲ │
//!      └────────fail─────────┘                  └────retry ok──────┘   └─┘ retry fails
//!
//! any state ──destroy──► PermanentlyClosed
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use webtop_core::{CallError, ChannelState, Method};

use crate::events::EventHub;

pub mod connector;
pub mod http;
pub mod socket;

pub use connector::{SocketConnector, SocketLink, WsConnector};
pub use http::HttpChannel;
pub use socket::{PendingCalls, SocketChannel};

/// Per-call options
#[derive(Clone, Debug)]
pub struct CallOptions {
    /// Show a busy indicator while the call is in flight
    pub indicator: bool,
    /// Deadline for request/response exchanges; ignored by the socket channel
    pub timeout: Option<Duration>,
    /// Abort an in-flight request/response exchange; ignored by the socket channel
    pub cancel: Option<CancellationToken>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            indicator: true,
            timeout: None,
            cancel: None,
        }
    }
}

impl CallOptions {
    pub fn without_indicator(mut self) -> Self {
        self.indicator = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Physical link to the application server
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Establish the link; fails if the first handshake fails
    async fn init(&self) -> Result<(), CallError>;

    /// Perform one remote exchange
    async fn request(
        &self,
        method: &Method,
        args: Value,
        options: &CallOptions,
    ) -> Result<Value, CallError>;

    fn is_online(&self) -> bool;

    fn state(&self) -> ChannelState;

    /// Subscriptions to server pushes and state transitions
    fn events(&self) -> &EventHub;

    /// Shut down for good; no reconnect is attempted afterwards
    async fn destroy(&self);
}

/// Host-side handle that reports connectivity changes
#[derive(Clone, Debug)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

/// Connectivity source a channel subscribes to
#[derive(Clone, Debug)]
pub struct ConnectivitySignal {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySignal {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next change; `None` once the host handle is gone
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        let online = *self.rx.borrow_and_update();
        Some(online)
    }
}

/// Create a connectivity signal pair, starting in the given state
pub fn connectivity(online: bool) -> (ConnectivityHandle, ConnectivitySignal) {
    let (tx, rx) = watch::channel(online);
    (ConnectivityHandle { tx }, ConnectivitySignal { rx })
}
