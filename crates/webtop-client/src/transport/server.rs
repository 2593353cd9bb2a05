//! Application-server filesystem backend
//!
//! Every operation is one `FS:<operation>` call through the dispatcher.
//! File content travels base64-encoded in the JSON arguments and results.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::warn;

use webtop_core::{CallError, FileInfo, FileRef, FindQuery, Operation};

use super::Backend;
use crate::channel::CallOptions;
use crate::dispatcher::Remote;
use crate::http::{fetch_bytes, HttpClient};

pub struct ServerBackend {
    remote: Arc<dyn Remote>,
    http: Arc<dyn HttpClient>,
    fs_uri: String,
}

impl ServerBackend {
    pub fn new(remote: Arc<dyn Remote>, http: Arc<dyn HttpClient>, fs_uri: impl Into<String>) -> Self {
        Self {
            remote,
            http,
            fs_uri: fs_uri.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, op: Operation, args: Value) -> Result<Value, CallError> {
        self.remote.call(&op.fs_method(), args, CallOptions::default()).await
    }
}

/// Parse a listing, skipping entries that do not describe a file
fn parse_entries(op: Operation, value: Value) -> Result<Vec<FileRef>, CallError> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(CallError::Protocol(format!(
                "{} returned {} instead of a list",
                op,
                type_name(&other)
            )))
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<FileRef>(entry) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("skipping malformed {} entry: {}", op, e);
                None
            }
        })
        .collect())
}

fn decode_content(value: Value) -> Result<Vec<u8>, CallError> {
    let encoded = match value {
        Value::String(s) => s,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::String(s)) => s,
            _ => return Err(CallError::Protocol("read reply has no data".into())),
        },
        other => {
            return Err(CallError::Protocol(format!(
                "read returned {}",
                type_name(&other)
            )))
        }
    };
    BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| CallError::Protocol(format!("invalid file content: {}", e)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl Backend for ServerBackend {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn scandir(&self, dir: &FileRef) -> Result<Vec<FileRef>, CallError> {
        let result = self.call(Operation::Scandir, json!({ "path": dir.path() })).await?;
        let dir_path = dir.path().trim_end_matches('/');
        Ok(parse_entries(Operation::Scandir, result)?
            .into_iter()
            .filter(|f| f.path().trim_end_matches('/') != dir_path)
            .collect())
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        let result = self.call(Operation::Read, json!({ "path": file.path() })).await?;
        decode_content(result)
    }

    async fn write(&self, file: &FileRef, data: &[u8]) -> Result<(), CallError> {
        self.call(
            Operation::Write,
            json!({ "path": file.path(), "data": BASE64.encode(data) }),
        )
        .await?;
        Ok(())
    }

    async fn copy(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Copy, json!({ "src": src.path(), "dest": dest.path() }))
            .await?;
        Ok(())
    }

    async fn rename(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Move, json!({ "src": src.path(), "dest": dest.path() }))
            .await?;
        Ok(())
    }

    async fn unlink(&self, file: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Unlink, json!({ "path": file.path() })).await?;
        Ok(())
    }

    async fn mkdir(&self, dir: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Mkdir, json!({ "path": dir.path() })).await?;
        Ok(())
    }

    async fn exists(&self, file: &FileRef) -> Result<bool, CallError> {
        let result = self.call(Operation::Exists, json!({ "path": file.path() })).await?;
        result
            .as_bool()
            .ok_or_else(|| CallError::Protocol(format!("exists returned {}", type_name(&result))))
    }

    async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError> {
        let result = self.call(Operation::Fileinfo, json!({ "path": file.path() })).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn find(&self, dir: &FileRef, query: &FindQuery) -> Result<Vec<FileRef>, CallError> {
        let result = self
            .call(
                Operation::Find,
                json!({ "path": dir.path(), "query": query.query, "limit": query.limit }),
            )
            .await?;
        parse_entries(Operation::Find, result)
    }

    async fn trash(&self, file: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Trash, json!({ "path": file.path() })).await?;
        Ok(())
    }

    async fn untrash(&self, file: &FileRef) -> Result<(), CallError> {
        self.call(Operation::Untrash, json!({ "path": file.path() })).await?;
        Ok(())
    }

    async fn empty_trash(&self, root: &FileRef) -> Result<(), CallError> {
        self.call(Operation::EmptyTrash, json!({ "path": root.path() })).await?;
        Ok(())
    }

    async fn free_space(&self, root: &FileRef) -> Result<Option<u64>, CallError> {
        let result = self.call(Operation::FreeSpace, json!({ "root": root.path() })).await?;
        match result.as_i64() {
            // The server reports -1 when the quota is unknown
            Some(n) if n < 0 => Ok(None),
            Some(n) => Ok(Some(n as u64)),
            None if result.is_null() => Ok(None),
            None => Err(CallError::Protocol(format!(
                "freeSpace returned {}",
                type_name(&result)
            ))),
        }
    }

    async fn url(&self, file: &FileRef) -> Result<String, CallError> {
        Ok(format!(
            "{}/get/{}",
            self.fs_uri,
            urlencoding::encode(file.path())
        ))
    }

    fn http(&self) -> Option<&dyn HttpClient> {
        Some(self.http.as_ref())
    }

    /// Same connectivity gate as a dispatched call; the fetch bypasses the channel
    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        if !self.remote.is_available() {
            return Err(CallError::ConnectivityUnavailable);
        }
        let url = self.url(file).await?;
        fetch_bytes(self.http.as_ref(), &url).await
    }

    async fn upload(&self, dest: &FileRef, filename: &str, data: &[u8]) -> Result<FileRef, CallError> {
        let result = self
            .call(
                Operation::Upload,
                json!({ "path": dest.path(), "filename": filename, "data": BASE64.encode(data) }),
            )
            .await?;
        match serde_json::from_value::<FileRef>(result) {
            Ok(file) => Ok(file),
            // Older servers reply with a bare `true`
            Err(_) => Ok(dest
                .child(filename, webtop_core::FileKind::File)
                .with_size(data.len() as u64)),
        }
    }
}
