//! Core type definitions for webtop
//!
//! These are the value objects shared by the transport backends, the
//! router, and the connection channels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path;

/// Kind of a filesystem entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Application,
    Trash,
}

/// Immutable reference to a file on some mount
///
/// Produced by transport backends from listing or metadata responses and
/// passed around everywhere else as an opaque value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    path: String,
    filename: String,
    #[serde(default)]
    mime: Option<String>,
    #[serde(rename = "type")]
    kind: FileKind,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    id: Option<String>,
}

impl FileRef {
    /// Create a reference, deriving the display name from the path
    pub fn new(path: impl Into<String>, kind: FileKind) -> Self {
        let path = path.into();
        let filename = path::basename(&path).to_string();
        Self {
            path,
            filename,
            mime: None,
            kind,
            size: 0,
            id: None,
        }
    }

    /// Reference to a regular file
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, FileKind::File)
    }

    /// Reference to a directory
    pub fn dir(path: impl Into<String>) -> Self {
        Self::new(path, FileKind::Dir)
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_mime(mut self, mime: Option<String>) -> Self {
        self.mime = mime;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backend-specific opaque identifier (e.g. a WebDAV etag)
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    /// Reference to the directory containing this entry
    pub fn parent(&self) -> FileRef {
        FileRef::dir(path::dirname(&self.path))
    }

    /// Reference to a child entry of this directory
    pub fn child(&self, name: &str, kind: FileKind) -> FileRef {
        FileRef::new(path::join(&self.path, name), kind)
    }
}

impl From<&str> for FileRef {
    fn from(p: &str) -> Self {
        if p.ends_with('/') {
            FileRef::dir(p)
        } else {
            FileRef::file(p)
        }
    }
}

/// Metadata for a single entry, as returned by `fileinfo`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub filename: String,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    /// Backend-specific properties not covered above
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FileInfo {
    pub fn from_ref(file: &FileRef) -> Self {
        Self {
            path: file.path().to_string(),
            filename: file.filename().to_string(),
            mime: file.mime().map(String::from),
            kind: file.kind(),
            size: file.size(),
            modified: None,
            etag: file.id().map(String::from),
            extra: BTreeMap::new(),
        }
    }
}

/// Search parameters for `find`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindQuery {
    /// Case-insensitive substring matched against entry names
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        name.to_lowercase().contains(&self.query.to_lowercase())
    }
}

/// Filesystem change notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Event name, e.g. `vfs:write` or `vfs:unlink`
    pub event: String,
    pub file: FileRef,
}

impl WatchEvent {
    pub fn new(event: impl Into<String>, file: FileRef) -> Self {
        Self {
            event: event.into(),
            file,
        }
    }
}

/// Storage technology behind a mount
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The application server's own filesystem API
    #[default]
    Server,
    /// A WebDAV-compatible remote store
    WebDav,
    /// Plain http(s) URLs, read-only
    Web,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::WebDav => write!(f, "webdav"),
            Self::Web => write!(f, "web"),
        }
    }
}

/// Backend options of a mount
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Remote host for WebDAV mounts, e.g. `https://dav.example/`
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Whether the host may be contacted directly; otherwise requests are proxied by the server
    pub cors: bool,
    /// XML namespace used in WebDAV property requests
    pub ns: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            password: None,
            cors: true,
            ns: "DAV:".into(),
        }
    }
}

/// Configuration of one mount
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub name: String,
    /// Path prefix owned by this mount, e.g. `home:///` or `/remote`
    pub prefix: String,
    #[serde(default)]
    pub transport: BackendKind,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub options: MountOptions,
}

impl MountConfig {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, transport: BackendKind) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            transport,
            read_only: false,
            options: MountOptions::default(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_options(mut self, options: MountOptions) -> Self {
        self.options = options;
        self
    }
}

/// Process-wide connectivity state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Online,
    Offline,
}

impl ConnectionState {
    /// Event name emitted to subscribers on transition into this state
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Lifecycle of a connection channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PermanentlyClosed,
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        self == ChannelState::Connected
    }
}
