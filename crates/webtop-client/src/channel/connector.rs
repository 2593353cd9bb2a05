//! WebSocket link establishment
//!
//! A [`SocketConnector`] turns a URL into a [`SocketLink`]: a pair of text
//! queues backed by pump tasks. The socket channel only sees the queues,
//! which keeps the multiplexing logic independent of tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use webtop_core::CallError;

use crate::CONNECT_TIMEOUT_SECS;

/// An open socket, as text frames in each direction
///
/// `inbound` yields `None` once the remote side has closed.
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens socket links
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SocketLink, CallError>;
}

/// Connector for real WebSocket endpoints
#[derive(Clone, Debug)]
pub struct WsConnector {
    timeout: Duration,
}

impl WsConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(CONNECT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<SocketLink, CallError> {
        debug!("Connecting to socket endpoint: {}", url);

        let ws = match timeout(self.timeout, connect_async(url)).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(CallError::BackendUnavailable(e.to_string())),
            Err(_) => return Err(CallError::Timeout),
        };
        info!("Connected to {}", url);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("socket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("socket closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("socket error: {}", e);
                        break;
                    }
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                    Some(Ok(_)) => continue,
                }
            }
        });

        Ok(SocketLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
