//! Read-only backend for plain `http://` and `https://` paths
//!
//! The path of a file is its URL.

use std::sync::Arc;

use async_trait::async_trait;

use webtop_core::{CallError, FileInfo, FileRef, FindQuery};

use super::{unsupported, Backend};
use crate::http::{fetch_bytes, HttpClient, HttpRequest};

pub struct WebBackend {
    http: Arc<dyn HttpClient>,
}

impl WebBackend {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Backend for WebBackend {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn scandir(&self, _dir: &FileRef) -> Result<Vec<FileRef>, CallError> {
        Err(unsupported("web", "scandir"))
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        fetch_bytes(self.http.as_ref(), file.path()).await
    }

    async fn write(&self, _file: &FileRef, _data: &[u8]) -> Result<(), CallError> {
        Err(unsupported("web", "write"))
    }

    async fn copy(&self, _src: &FileRef, _dest: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "copy"))
    }

    async fn rename(&self, _src: &FileRef, _dest: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "move"))
    }

    async fn unlink(&self, _file: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "unlink"))
    }

    async fn mkdir(&self, _dir: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "mkdir"))
    }

    async fn exists(&self, file: &FileRef) -> Result<bool, CallError> {
        let response = self.http.execute(HttpRequest::new("HEAD", file.path())).await?;
        match response.status {
            404 | 410 => Ok(false),
            _ => response.error_for_status().map(|_| true),
        }
    }

    async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError> {
        let response = self
            .http
            .execute(HttpRequest::new("HEAD", file.path()))
            .await?
            .error_for_status()?;

        let mut info = FileInfo::from_ref(file);
        info.mime = response.header("Content-Type").map(String::from);
        info.size = response
            .header("Content-Length")
            .and_then(|len| len.parse().ok())
            .unwrap_or(0);
        info.modified = response.header("Last-Modified").map(String::from);
        info.etag = response.header("ETag").map(|e| e.trim_matches('"').to_string());
        Ok(info)
    }

    async fn find(&self, _dir: &FileRef, _query: &FindQuery) -> Result<Vec<FileRef>, CallError> {
        Err(unsupported("web", "find"))
    }

    async fn trash(&self, _file: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "trash"))
    }

    async fn untrash(&self, _file: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "untrash"))
    }

    async fn empty_trash(&self, _root: &FileRef) -> Result<(), CallError> {
        Err(unsupported("web", "emptyTrash"))
    }

    async fn free_space(&self, _root: &FileRef) -> Result<Option<u64>, CallError> {
        Ok(None)
    }

    async fn url(&self, file: &FileRef) -> Result<String, CallError> {
        Ok(file.path().to_string())
    }

    fn http(&self) -> Option<&dyn HttpClient> {
        Some(self.http.as_ref())
    }

    async fn upload(&self, _dest: &FileRef, _filename: &str, _data: &[u8]) -> Result<FileRef, CallError> {
        Err(unsupported("web", "upload"))
    }
}
