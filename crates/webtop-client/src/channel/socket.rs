//! Persistent socket channel
//!
//! Every call gets the next correlation id and is recorded in
//! [`PendingCalls`] until the reply bearing that id arrives. Messages with
//! no id are server pushes and go to the [`EventHub`]. When the socket
//! closes, pending calls are dropped without replay and a supervisor task
//! reconnects: first after the short delay, then after the long delay,
//! until it succeeds or the channel is destroyed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webtop_core::{
    CallError, ChannelState, ConnectionState, Inbound, InboundEnvelope, Method, OutboundEnvelope,
    ReconnectConfig,
};

use super::connector::{SocketConnector, SocketLink};
use super::{CallOptions, Channel};
use crate::events::{EventHub, Notification};

/// Completion invoked with the reply to one call
pub type Completion = Box<dyn FnOnce(Result<Value, CallError>) + Send>;

/// Outstanding calls keyed by correlation id
pub struct PendingCalls {
    next_index: u64,
    calls: HashMap<u64, Completion>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_index: 1,
            calls: HashMap::new(),
        }
    }

    /// Record a call under the next correlation id
    pub fn register(&mut self, completion: Completion) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.calls.insert(index, completion);
        index
    }

    /// Remove and return the completion for `index`
    pub fn take(&mut self, index: u64) -> Option<Completion> {
        self.calls.remove(&index)
    }

    /// Drop every outstanding call without invoking it; returns how many
    pub fn drain(&mut self) -> usize {
        let count = self.calls.len();
        self.calls.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

struct SocketInner {
    url: String,
    connector: Arc<dyn SocketConnector>,
    reconnect: ReconnectConfig,
    state: Mutex<ChannelState>,
    pending: Mutex<PendingCalls>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: EventHub,
    attempts: AtomicU32,
    shutdown: CancellationToken,
}

impl SocketInner {
    fn is_closed(&self) -> bool {
        *self.state.lock() == ChannelState::PermanentlyClosed
    }

    fn install(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut state = self.state.lock();
        if *state == ChannelState::PermanentlyClosed {
            return false;
        }
        *self.outbound.lock() = Some(outbound);
        *state = ChannelState::Connected;
        true
    }

    fn send(&self, method: &Method, args: Value, completion: Completion) -> Result<u64, CallError> {
        if !self.state.lock().is_connected() {
            return Err(CallError::ConnectivityUnavailable);
        }

        let index = self.pending.lock().register(completion);
        let envelope = OutboundEnvelope::new(index, method, args);
        let sent = envelope
            .to_json()
            .map_err(CallError::from)
            .and_then(|json| match self.outbound.lock().as_ref() {
                Some(tx) => tx.send(json).map_err(|_| CallError::ConnectivityUnavailable),
                None => Err(CallError::ConnectivityUnavailable),
            });

        if let Err(e) = sent {
            self.pending.lock().take(index);
            return Err(e);
        }
        debug!("sent #{} {}", index, method);
        Ok(index)
    }

    fn handle_message(&self, text: &str) {
        let envelope = match InboundEnvelope::from_json(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("ignoring malformed socket message: {}", e);
                return;
            }
        };

        match envelope.classify() {
            Some(Inbound::Reply { index, outcome }) => {
                // Take under the lock, invoke outside it.
                let completion = self.pending.lock().take(index);
                match completion {
                    Some(complete) => complete(outcome),
                    None => debug!("ignoring reply for unknown call #{}", index),
                }
            }
            Some(Inbound::Event { action, args }) => self.events.emit(&action, &args),
            None => warn!("ignoring socket message with neither index nor action"),
        }
    }

    /// Socket went away underneath us; false if the channel was destroyed
    fn on_close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ChannelState::PermanentlyClosed {
                return false;
            }
            *state = ChannelState::Reconnecting;
        }
        self.outbound.lock().take();

        let attempt = self.attempts.load(Ordering::SeqCst);
        warn!("socket to {} closed", self.url);
        self.events.transition(ConnectionState::Offline, attempt);
        self.events.notify(Notification::ConnectionLost);

        let dropped = self.pending.lock().drain();
        if dropped > 0 {
            info!("dropped {} pending calls", dropped);
        }
        true
    }

    /// Retry until connected; `None` once the channel is destroyed
    async fn reconnect(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        loop {
            let attempt = self.attempts.load(Ordering::SeqCst) + 1;
            let delay = self.reconnect.delay_for(attempt);
            info!("Reconnecting to {} in {:?} (attempt {})", self.url, delay, attempt);

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                result = self.connector.connect(&self.url) => result,
            };

            match result {
                Ok(SocketLink { outbound, inbound }) => {
                    if !self.install(outbound) {
                        return None;
                    }
                    self.attempts.store(0, Ordering::SeqCst);
                    info!("Reconnected to {}", self.url);
                    self.events.transition(ConnectionState::Online, attempt);
                    self.events.notify(Notification::ConnectionRestored);
                    return Some(inbound);
                }
                Err(e) => {
                    warn!("Reconnect failed for {}: {}", self.url, e);
                    if self.is_closed() {
                        return None;
                    }
                    self.attempts.store(attempt, Ordering::SeqCst);
                    self.events.transition(ConnectionState::Offline, attempt);
                    self.events.notify(Notification::ReconnectFailed { attempt });
                }
            }
        }
    }
}

async fn supervise(inner: Arc<SocketInner>, mut inbound: mpsc::UnboundedReceiver<String>) {
    loop {
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                message = inbound.recv() => match message {
                    Some(text) => inner.handle_message(&text),
                    None => break,
                },
            }
        }

        if !inner.on_close() {
            return;
        }
        inbound = match inner.reconnect().await {
            Some(rx) => rx,
            None => return,
        };
    }
}

/// Multiplexed, reconnecting channel over one persistent socket
pub struct SocketChannel {
    inner: Arc<SocketInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SocketChannel {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn SocketConnector>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                url: url.into(),
                connector,
                reconnect,
                state: Mutex::new(ChannelState::Disconnected),
                pending: Mutex::new(PendingCalls::new()),
                outbound: Mutex::new(None),
                events: EventHub::new(),
                attempts: AtomicU32::new(0),
                shutdown: CancellationToken::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Send a call; `completion` runs at most once, when the reply arrives
    ///
    /// Returns the correlation id. The completion is silently dropped if
    /// the socket closes or the channel is destroyed first.
    pub fn send<F>(&self, method: &Method, args: Value, completion: F) -> Result<u64, CallError>
    where
        F: FnOnce(Result<Value, CallError>) + Send + 'static,
    {
        self.inner.send(method, args, Box::new(completion))
    }

    /// Failed retries since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

#[async_trait]
impl Channel for SocketChannel {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn init(&self) -> Result<(), CallError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ChannelState::PermanentlyClosed => {
                    return Err(CallError::BackendUnavailable("channel destroyed".into()))
                }
                ChannelState::Disconnected => *state = ChannelState::Connecting,
                _ => return Ok(()),
            }
        }

        let link = match self.inner.connector.connect(&self.inner.url).await {
            Ok(link) => link,
            Err(e) => {
                let mut state = self.inner.state.lock();
                if *state == ChannelState::Connecting {
                    *state = ChannelState::Disconnected;
                }
                return Err(e);
            }
        };

        let SocketLink { outbound, inbound } = link;
        if !self.inner.install(outbound) {
            return Err(CallError::BackendUnavailable("channel destroyed".into()));
        }
        info!("socket channel connected to {}", self.inner.url);
        self.inner.events.transition(ConnectionState::Online, 0);

        let handle = tokio::spawn(supervise(self.inner.clone(), inbound));
        *self.supervisor.lock() = Some(handle);
        Ok(())
    }

    async fn request(
        &self,
        method: &Method,
        args: Value,
        _options: &CallOptions,
    ) -> Result<Value, CallError> {
        let (tx, rx) = oneshot::channel();
        self.send(method, args, move |outcome| {
            let _ = tx.send(outcome);
        })?;

        // A dropped completion means the call was discarded by a close or destroy.
        rx.await.unwrap_or(Err(CallError::ConnectivityUnavailable))
    }

    fn is_online(&self) -> bool {
        self.inner.state.lock().is_connected()
    }

    fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    fn events(&self) -> &EventHub {
        &self.inner.events
    }

    async fn destroy(&self) {
        *self.inner.state.lock() = ChannelState::PermanentlyClosed;
        self.inner.shutdown.cancel();
        self.inner.outbound.lock().take();
        let dropped = self.inner.pending.lock().drain();

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("socket channel closed ({} pending calls dropped)", dropped);
    }
}
