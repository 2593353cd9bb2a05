//! Webtop Client - connection channels, call dispatch, and VFS transport routing
//!
//! This crate provides:
//! - Connection channels to the application server (one HTTP exchange per
//!   call, or a persistent multiplexed WebSocket with automatic reconnect)
//! - The call dispatcher every subsystem uses to issue remote calls
//! - Transport backends (server filesystem API, WebDAV, plain web URLs)
//! - The mount router and the VFS facade on top of it
//!
//! # Architecture
//!
//! ```text
//! caller ──► Vfs ──► Router ──► Backend ─┬─► Dispatcher ──► Channel ──► server
//!                     │ read-only policy │        │ busy indicator
//!                     │ longest prefix   └─► HttpClient (WebDAV, web)
//!                     ▼
//!                 mount table (copy-on-write snapshot)
//! ```
//!
//! Server pushes arriving on the socket are fanned out through the channel's
//! [`EventHub`]; `vfs:watch` pushes are forwarded to [`Vfs::notify`].

pub mod channel;
pub mod client;
pub mod dispatcher;
pub mod events;
pub mod http;
pub mod indicator;
pub mod router;
pub mod transport;
pub mod vfs;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{
    connectivity, CallOptions, Channel, ConnectivityHandle, ConnectivitySignal, HttpChannel,
    PendingCalls, SocketChannel, SocketConnector, SocketLink, WsConnector,
};
pub use client::{ClientError, WebtopClient};
pub use dispatcher::{Dispatcher, Remote};
pub use events::{EventHub, Notification, SubscriptionId};
pub use http::{HttpClient, HttpRequest, HttpResponse, ProxiedHttpClient, ReqwestClient};
pub use indicator::{BusyGuard, BusyIndicator, IndicatorSink};
pub use router::{FsRequest, FsResponse, Mount, Router};
pub use transport::{Backend, ServerBackend, WebBackend, WebDavBackend};
pub use vfs::{Vfs, WatchId};

/// Name of the API method servers expose for proxied HTTP requests
pub const PROXY_METHOD: &str = "curl";

/// Timeout for establishing HTTP and socket connections
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
