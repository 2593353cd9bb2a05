//! Storage transport backends
//!
//! A [`Backend`] implements the fixed set of storage operations against one
//! storage technology:
//!
//! ```text
//!                 ┌──────────────┐
//!                 │    Router    │  longest-prefix mount lookup,
//!                 └──────┬───────┘  read-only policy
//!        ┌───────────────┼────────────────┐
//! ┌──────▼──────┐ ┌──────▼───────┐ ┌──────▼──────┐
//! │ServerBackend│ │WebDavBackend │ │ WebBackend  │
//! │ FS:* calls  │ │ HTTP + XML   │ │ GET / HEAD  │
//! └─────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! Backends never check policy themselves; the router does that before
//! any operation reaches them.

use async_trait::async_trait;

use webtop_core::{CallError, FileInfo, FileRef, FindQuery};

use crate::http::{fetch_bytes, HttpClient};

pub mod propfind;
pub mod server;
pub mod web;
pub mod webdav;

pub use server::ServerBackend;
pub use web::WebBackend;
pub use webdav::WebDavBackend;

/// Storage operations of one transport
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs and errors
    fn name(&self) -> &'static str;

    /// List a directory; the directory itself is not included
    async fn scandir(&self, dir: &FileRef) -> Result<Vec<FileRef>, CallError>;

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError>;

    async fn write(&self, file: &FileRef, data: &[u8]) -> Result<(), CallError>;

    async fn copy(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError>;

    /// The `move` operation
    async fn rename(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError>;

    async fn unlink(&self, file: &FileRef) -> Result<(), CallError>;

    async fn mkdir(&self, dir: &FileRef) -> Result<(), CallError>;

    async fn exists(&self, file: &FileRef) -> Result<bool, CallError>;

    async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError>;

    async fn find(&self, dir: &FileRef, query: &FindQuery) -> Result<Vec<FileRef>, CallError>;

    async fn trash(&self, file: &FileRef) -> Result<(), CallError>;

    async fn untrash(&self, file: &FileRef) -> Result<(), CallError>;

    async fn empty_trash(&self, root: &FileRef) -> Result<(), CallError>;

    /// Free bytes on the mount containing `root`; `None` when unknown
    async fn free_space(&self, root: &FileRef) -> Result<Option<u64>, CallError>;

    /// URL the content of `file` can be fetched from
    async fn url(&self, file: &FileRef) -> Result<String, CallError>;

    /// HTTP client used for plain byte fetches
    fn http(&self) -> Option<&dyn HttpClient> {
        None
    }

    /// Fetch the content behind [`Backend::url`]
    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        let url = self.url(file).await?;
        match self.http() {
            Some(http) => fetch_bytes(http, &url).await,
            None => Err(CallError::Unsupported {
                backend: self.name(),
                operation: "download",
            }),
        }
    }

    /// Store `data` as `filename` inside `dest`
    async fn upload(&self, dest: &FileRef, filename: &str, data: &[u8]) -> Result<FileRef, CallError> {
        let file = dest.child(filename, webtop_core::FileKind::File).with_size(data.len() as u64);
        self.write(&file, data).await?;
        Ok(file)
    }
}

/// Error for operations a backend cannot perform
pub(crate) fn unsupported(backend: &'static str, operation: &'static str) -> CallError {
    CallError::Unsupported { backend, operation }
}
