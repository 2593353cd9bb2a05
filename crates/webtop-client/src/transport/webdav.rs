//! WebDAV backend
//!
//! Logical operations map onto WebDAV primitives:
//!
//! | operation        | request                         |
//! |------------------|---------------------------------|
//! | scandir          | PROPFIND, Depth: 1              |
//! | exists, fileinfo | PROPFIND, Depth: 0              |
//! | read / write     | GET / PUT                       |
//! | mkdir            | MKCOL                           |
//! | copy / move      | COPY / MOVE with `Destination`  |
//! | unlink           | DELETE                          |
//! | freeSpace        | PROPFIND `quota-available-bytes` |
//!
//! Mount paths are resolved relative to the mount prefix and appended to
//! the configured host, one percent-encoded segment at a time.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;
use url::Url;

use webtop_core::{path, CallError, FileInfo, FileKind, FileRef, FindQuery, MountConfig};

use super::propfind::{self, DavEntry};
use super::{unsupported, Backend};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

fn decode_lossy(encoded: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(encoded.as_bytes())).into_owned()
}

pub struct WebDavBackend {
    prefix: String,
    host: Url,
    ns: String,
    authorization: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl WebDavBackend {
    pub fn new(mount: &MountConfig, http: Arc<dyn HttpClient>) -> Result<Self, CallError> {
        let options = &mount.options;
        let host = options.host.as_deref().ok_or_else(|| {
            CallError::InvalidArgument(format!("webdav mount '{}' has no host", mount.name))
        })?;
        let mut host = Url::parse(host)
            .map_err(|e| CallError::InvalidArgument(format!("webdav host {}: {}", host, e)))?;
        if !host.path().ends_with('/') {
            let path = format!("{}/", host.path());
            host.set_path(&path);
        }

        let authorization = options.username.as_ref().map(|user| {
            let password = options.password.as_deref().unwrap_or("");
            format!("Basic {}", BASE64.encode(format!("{}:{}", user, password)))
        });

        Ok(Self {
            prefix: mount.prefix.clone(),
            host,
            ns: options.ns.clone(),
            authorization,
            http,
        })
    }

    /// Remote URL of a mount path
    pub fn remote_url(&self, file: &FileRef) -> String {
        let relative = path::mount_relative(file.path(), &self.prefix);
        let encoded: Vec<String> = relative
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let mut url = format!("{}{}", self.host, encoded.join("/"));
        if file.is_dir() && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    /// Mount path of an href from a multistatus response
    fn local_path(&self, href: &str, is_collection: bool) -> String {
        let href_path = match Url::parse(href) {
            Ok(url) => url.path().to_string(),
            Err(_) => href.to_string(),
        };
        let decoded = decode_lossy(&href_path);
        let base = decode_lossy(self.host.path());
        let relative = decoded
            .strip_prefix(&base)
            .unwrap_or_else(|| decoded.trim_start_matches('/'));

        let mut local = path::join(&self.prefix, relative);
        if is_collection && !local.ends_with('/') {
            local.push('/');
        }
        local
    }

    fn to_file(&self, entry: &DavEntry) -> FileRef {
        let local = self.local_path(&entry.href, entry.is_collection);
        let kind = if entry.is_collection {
            FileKind::Dir
        } else {
            FileKind::File
        };
        let mut file = FileRef::new(local, kind)
            .with_mime(entry.content_type.clone())
            .with_size(entry.content_length.unwrap_or(0))
            .with_id(entry.etag.clone());
        if let Some(name) = &entry.display_name {
            file = file.with_filename(name.clone());
        }
        file
    }

    fn request(&self, method: &str, url: String) -> HttpRequest {
        let request = HttpRequest::new(method, url);
        match &self.authorization {
            Some(auth) => request.header("Authorization", auth.clone()),
            None => request,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        debug!("{} {}", request.method, request.url);
        self.http.execute(request).await
    }

    async fn propfind(&self, file: &FileRef, depth: u8) -> Result<Vec<DavEntry>, CallError> {
        let request = self
            .request("PROPFIND", self.remote_url(file))
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(propfind::request_body(&self.ns));
        let response = self.send(request).await?.error_for_status()?;
        propfind::parse_multistatus(&response.text())
    }

    async fn single(&self, file: &FileRef) -> Result<DavEntry, CallError> {
        self.propfind(file, 0)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CallError::Protocol(format!("empty multistatus for {}", file.path())))
    }

    async fn transfer(&self, method: &str, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        let request = self
            .request(method, self.remote_url(src))
            .header("Destination", self.remote_url(dest))
            .header("Overwrite", "T");
        self.send(request).await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Backend for WebDavBackend {
    fn name(&self) -> &'static str {
        "webdav"
    }

    async fn scandir(&self, dir: &FileRef) -> Result<Vec<FileRef>, CallError> {
        let dir = FileRef::dir(dir.path());
        let own = self.remote_url(&dir);
        let own = own.trim_end_matches('/');
        let entries = self.propfind(&dir, 1).await?;

        Ok(entries
            .iter()
            .map(|entry| self.to_file(entry))
            .filter(|file| self.remote_url(file).trim_end_matches('/') != own)
            .collect())
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        let response = self
            .send(self.request("GET", self.remote_url(file)))
            .await?
            .error_for_status()?;
        Ok(response.body)
    }

    async fn write(&self, file: &FileRef, data: &[u8]) -> Result<(), CallError> {
        let request = self
            .request("PUT", self.remote_url(file))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec());
        self.send(request).await?.error_for_status()?;
        Ok(())
    }

    async fn copy(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.transfer("COPY", src, dest).await
    }

    async fn rename(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.transfer("MOVE", src, dest).await
    }

    async fn unlink(&self, file: &FileRef) -> Result<(), CallError> {
        self.send(self.request("DELETE", self.remote_url(file)))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mkdir(&self, dir: &FileRef) -> Result<(), CallError> {
        let dir = FileRef::dir(dir.path());
        self.send(self.request("MKCOL", self.remote_url(&dir)))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn exists(&self, file: &FileRef) -> Result<bool, CallError> {
        match self.propfind(file, 0).await {
            Ok(entries) => Ok(!entries.is_empty()),
            Err(CallError::Remote { code: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError> {
        let entry = self.single(file).await?;
        let mut info = FileInfo::from_ref(&self.to_file(&entry));
        info.modified = entry.last_modified;
        Ok(info)
    }

    async fn find(&self, dir: &FileRef, query: &FindQuery) -> Result<Vec<FileRef>, CallError> {
        let matches = self
            .scandir(dir)
            .await?
            .into_iter()
            .filter(|f| query.matches(f.filename()));
        Ok(match query.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    async fn trash(&self, _file: &FileRef) -> Result<(), CallError> {
        Err(unsupported("webdav", "trash"))
    }

    async fn untrash(&self, _file: &FileRef) -> Result<(), CallError> {
        Err(unsupported("webdav", "untrash"))
    }

    async fn empty_trash(&self, _root: &FileRef) -> Result<(), CallError> {
        Err(unsupported("webdav", "emptyTrash"))
    }

    async fn free_space(&self, root: &FileRef) -> Result<Option<u64>, CallError> {
        Ok(self.single(&FileRef::dir(root.path())).await?.quota_available)
    }

    async fn url(&self, file: &FileRef) -> Result<String, CallError> {
        Ok(self.remote_url(file))
    }

    fn http(&self) -> Option<&dyn HttpClient> {
        Some(self.http.as_ref())
    }

    /// Downloads need the mount credentials, so go through GET
    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        self.read(file).await
    }
}
