//! Wire protocol for calls to the application server
//!
//! Request/response channels embed the method in the URL path
//! (`/API/<method>` or `/FS/<method>`). The persistent socket carries one
//! JSON envelope per call:
//!
//! ```text
//! outbound  { "_index": 7, "path": "/FS/read", "args": { ... } }
//! reply     { "_index": 7, "result": ..., "error": null }
//! push      { "action": "vfs:watch", "args": { "event": ..., "file": ... } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, WireError};
use crate::FS_METHOD_PREFIX;

/// A dispatcher method, split into its wire namespace
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// Generic application API call
    Api(String),
    /// Filesystem call, written `FS:<name>` by callers
    Fs(String),
}

impl Method {
    /// Parse a caller-facing method name; `FS:` selects the filesystem namespace
    pub fn parse(name: &str) -> Self {
        match name.strip_prefix(FS_METHOD_PREFIX) {
            Some(fs) => Method::Fs(fs.to_string()),
            None => Method::Api(name.to_string()),
        }
    }

    /// Method name with any namespace prefix stripped
    pub fn name(&self) -> &str {
        match self {
            Method::Api(n) | Method::Fs(n) => n,
        }
    }

    pub fn is_fs(&self) -> bool {
        matches!(self, Method::Fs(_))
    }

    /// Path the method is transmitted under, e.g. `/FS/read`
    pub fn wire_path(&self) -> String {
        match self {
            Method::Api(n) => format!("/API/{}", n),
            Method::Fs(n) => format!("/FS/{}", n),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Api(n) => write!(f, "{}", n),
            Method::Fs(n) => write!(f, "{}{}", FS_METHOD_PREFIX, n),
        }
    }
}

/// Closed set of storage operations a transport backend implements
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Scandir,
    Read,
    Write,
    Copy,
    Move,
    Unlink,
    Mkdir,
    Exists,
    Fileinfo,
    Find,
    Trash,
    Untrash,
    EmptyTrash,
    FreeSpace,
    Url,
    Download,
    Upload,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::Scandir,
        Operation::Read,
        Operation::Write,
        Operation::Copy,
        Operation::Move,
        Operation::Unlink,
        Operation::Mkdir,
        Operation::Exists,
        Operation::Fileinfo,
        Operation::Find,
        Operation::Trash,
        Operation::Untrash,
        Operation::EmptyTrash,
        Operation::FreeSpace,
        Operation::Url,
        Operation::Download,
        Operation::Upload,
    ];

    /// Wire name of the operation
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Scandir => "scandir",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::Unlink => "unlink",
            Operation::Mkdir => "mkdir",
            Operation::Exists => "exists",
            Operation::Fileinfo => "fileinfo",
            Operation::Find => "find",
            Operation::Trash => "trash",
            Operation::Untrash => "untrash",
            Operation::EmptyTrash => "emptyTrash",
            Operation::FreeSpace => "freeSpace",
            Operation::Url => "url",
            Operation::Download => "download",
            Operation::Upload => "upload",
        }
    }

    /// Operations refused on read-only mounts
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::Upload
                | Operation::Unlink
                | Operation::Write
                | Operation::Mkdir
                | Operation::Move
                | Operation::Trash
                | Operation::Untrash
                | Operation::EmptyTrash
        )
    }

    /// Dispatcher method used when the operation is sent to the server
    pub fn fs_method(self) -> String {
        format!("{}{}", FS_METHOD_PREFIX, self.as_str())
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CallError::InvalidArgument(format!("unknown operation: {}", s)))
    }
}

/// One outbound call on the persistent socket
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "_index")]
    pub index: u64,
    pub path: String,
    pub args: Value,
}

impl OutboundEnvelope {
    pub fn new(index: u64, method: &Method, args: Value) -> Self {
        Self {
            index,
            path: method.wire_path(),
            args,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Any message received on the persistent socket
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "_index", default)]
    pub index: Option<u64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

/// Classified inbound message
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Reply to the call carrying this correlation id
    Reply {
        index: u64,
        outcome: Result<Value, CallError>,
    },
    /// Unsolicited server push
    Event { action: String, args: Value },
}

impl InboundEnvelope {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Split into a reply or a pushed event; `None` when neither shape fits
    pub fn classify(self) -> Option<Inbound> {
        match (self.index, self.action) {
            (Some(index), _) => {
                let outcome = match self.error {
                    Some(e) => Err(e.into()),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Some(Inbound::Reply { index, outcome })
            }
            (None, Some(action)) => Some(Inbound::Event {
                action,
                args: self.args.unwrap_or(Value::Null),
            }),
            (None, None) => None,
        }
    }
}

/// Response body of a request/response exchange
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReplyBody {
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub result: Value,
}

impl ReplyBody {
    pub fn into_result(self) -> Result<Value, CallError> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.result),
        }
    }
}
