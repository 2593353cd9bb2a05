//! Webtop Core - Shared types, wire envelopes, and configuration
//!
//! This crate contains the foundational types used by the webtop connection
//! and transport layer. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod path;
pub mod protocol;
pub mod types;

pub use config::{
    Config, ConfigError, ConnectionConfig, ReconnectConfig, SocketConfig, TransportKind, VfsConfig,
};
pub use error::*;
pub use protocol::*;
pub use types::*;

/// Prefix marking a dispatcher method as a filesystem call (`FS:read`)
pub const FS_METHOD_PREFIX: &str = "FS:";

/// Server push action carrying filesystem change notifications
pub const VFS_WATCH_ACTION: &str = "vfs:watch";

/// Default maximum upload size (256 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 256 * 1024 * 1024;

/// Default short reconnect delay in milliseconds (first retry)
pub const DEFAULT_SHORT_RECONNECT_MS: u64 = 500;

/// Default long reconnect delay in milliseconds (subsequent retries)
pub const DEFAULT_LONG_RECONNECT_MS: u64 = 5000;
