//! Error types for the webtop connection and transport layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure delivered to the caller of any remote call or VFS operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Channel offline, or no network backend in standalone mode
    #[error("operation unavailable in current connectivity mode")]
    ConnectivityUnavailable,

    #[error("no mount matches path: {0}")]
    NoSuchMount(String),

    #[error("mount '{mount}' is read-only, refusing {operation}")]
    ReadOnlyViolation { mount: String, operation: String },

    /// The backend answered with a failure status
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },

    /// Malformed or unparseable response
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timed out")]
    Timeout,

    #[error("request canceled")]
    Canceled,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: u64, max: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CallError {
    /// Shorthand for a remote failure
    pub fn remote(code: u16, message: impl Into<String>) -> Self {
        CallError::Remote {
            code,
            message: message.into(),
        }
    }

    /// Whether this failure is caused by the connectivity mode rather than the call
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            CallError::ConnectivityUnavailable | CallError::BackendUnavailable(_)
        )
    }

    /// Stable machine-readable code for collaborators rendering the failure
    pub fn code(&self) -> &'static str {
        match self {
            CallError::ConnectivityUnavailable => "connectivity_unavailable",
            CallError::NoSuchMount(_) => "no_such_mount",
            CallError::ReadOnlyViolation { .. } => "read_only",
            CallError::Remote { .. } => "remote",
            CallError::Protocol(_) => "protocol",
            CallError::Timeout => "timeout",
            CallError::Canceled => "canceled",
            CallError::BackendUnavailable(_) => "backend_unavailable",
            CallError::Unsupported { .. } => "unsupported",
            CallError::UploadTooLarge { .. } => "upload_too_large",
            CallError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Protocol(e.to_string())
    }
}

/// Error payload as carried in server responses
///
/// Servers send either a bare string or an object with a code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireError {
    Message(String),
    Detailed {
        #[serde(default = "default_error_code")]
        code: u16,
        message: String,
    },
}

fn default_error_code() -> u16 {
    500
}

impl From<WireError> for CallError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Message(message) => CallError::Remote {
                code: default_error_code(),
                message,
            },
            WireError::Detailed { code, message } => CallError::Remote { code, message },
        }
    }
}
