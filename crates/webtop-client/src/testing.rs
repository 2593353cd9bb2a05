//! In-process fakes for the network seams

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use webtop_core::{path, CallError, ChannelState, FileInfo, FileRef, FindQuery, Method};

use crate::channel::{CallOptions, Channel, SocketConnector, SocketLink};
use crate::dispatcher::Remote;
use crate::events::EventHub;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::transport::Backend;

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, CallError> {
    args[key]
        .as_str()
        .ok_or_else(|| CallError::InvalidArgument(format!("missing {}", key)))
}

/// Remote that answers every call with the same value and records calls
pub struct ScriptedRemote {
    reply: Value,
    calls: Mutex<Vec<(String, Value, bool)>>,
}

impl ScriptedRemote {
    pub fn new(reply: Value) -> Self {
        Self {
            reply,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(method, args, indicator)` per call
    pub fn calls(&self) -> Vec<(String, Value, bool)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Remote for ScriptedRemote {
    async fn call(&self, method: &str, args: Value, options: CallOptions) -> Result<Value, CallError> {
        self.calls
            .lock()
            .push((method.to_string(), args, options.indicator));
        Ok(self.reply.clone())
    }
}

/// Application server with an in-memory filesystem
///
/// Usable directly as a [`Remote`] or as the [`Channel`] under a dispatcher.
pub struct MemoryServer {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    listings: Mutex<HashMap<String, Value>>,
    free_space: Mutex<i64>,
    counts: Mutex<HashMap<String, usize>>,
    state: Mutex<ChannelState>,
    events: EventHub,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            listings: Mutex::new(HashMap::new()),
            free_space: Mutex::new(-1),
            counts: Mutex::new(HashMap::new()),
            state: Mutex::new(ChannelState::Disconnected),
            events: EventHub::new(),
        }
    }

    /// Serve a canned scandir reply for `path`
    pub fn set_listing(&self, path: &str, listing: Value) {
        self.listings.lock().insert(path.to_string(), listing);
    }

    pub fn set_free_space(&self, bytes: i64) {
        *self.free_space.lock() = bytes;
    }

    pub fn count(&self, method: &str) -> usize {
        self.counts.lock().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.counts.lock().values().sum()
    }

    fn entry(&self, p: &str) -> Value {
        let files = self.files.lock();
        match files.get(p) {
            Some(data) => json!({
                "path": p, "filename": path::basename(p), "type": "file", "size": data.len()
            }),
            None => json!({ "path": p, "filename": path::basename(p), "type": "dir" }),
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let dir = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        let files = self.files.lock();
        let dirs = self.dirs.lock();
        files
            .keys()
            .chain(dirs.iter())
            .filter(|p| p.as_str() != dir && path::dirname(p) == dir)
            .cloned()
            .collect()
    }

    fn not_found(p: &str) -> CallError {
        CallError::remote(404, format!("No such file: {}", p))
    }

    fn decode(args: &Value) -> Result<Vec<u8>, CallError> {
        BASE64
            .decode(str_arg(args, "data")?.as_bytes())
            .map_err(|e| CallError::InvalidArgument(e.to_string()))
    }

    fn handle(&self, method: &str, args: &Value) -> Result<Value, CallError> {
        *self.counts.lock().entry(method.to_string()).or_default() += 1;

        match method {
            "FS:scandir" => {
                let p = str_arg(args, "path")?;
                if let Some(listing) = self.listings.lock().get(p) {
                    return Ok(listing.clone());
                }
                let entries: Vec<Value> = self.children(p).iter().map(|c| self.entry(c)).collect();
                Ok(Value::Array(entries))
            }
            "FS:read" => {
                let p = str_arg(args, "path")?;
                let files = self.files.lock();
                let data = files.get(p).ok_or_else(|| Self::not_found(p))?;
                Ok(json!(BASE64.encode(data)))
            }
            "FS:write" => {
                let data = Self::decode(args)?;
                self.files.lock().insert(str_arg(args, "path")?.to_string(), data);
                Ok(json!(true))
            }
            "FS:copy" | "FS:move" => {
                let src = str_arg(args, "src")?;
                let dest = str_arg(args, "dest")?.to_string();
                let mut files = self.files.lock();
                let data = if method == "FS:move" {
                    files.remove(src)
                } else {
                    files.get(src).cloned()
                };
                files.insert(dest, data.ok_or_else(|| Self::not_found(src))?);
                Ok(json!(true))
            }
            "FS:unlink" => {
                let p = str_arg(args, "path")?;
                let removed = self.files.lock().remove(p).is_some() | self.dirs.lock().remove(p);
                if removed {
                    Ok(json!(true))
                } else {
                    Err(Self::not_found(p))
                }
            }
            "FS:mkdir" => {
                self.dirs.lock().insert(str_arg(args, "path")?.to_string());
                Ok(json!(true))
            }
            "FS:exists" => {
                let p = str_arg(args, "path")?;
                Ok(json!(self.files.lock().contains_key(p) || self.dirs.lock().contains(p)))
            }
            "FS:fileinfo" => {
                let p = str_arg(args, "path")?;
                if !self.files.lock().contains_key(p) && !self.dirs.lock().contains(p) {
                    return Err(Self::not_found(p));
                }
                Ok(self.entry(p))
            }
            "FS:find" => {
                let dir = str_arg(args, "path")?;
                let query = FindQuery::new(str_arg(args, "query")?);
                let found: Vec<Value> = self
                    .files
                    .lock()
                    .keys()
                    .filter(|p| p.starts_with(dir) && query.matches(path::basename(p)))
                    .map(|p| json!({"path": p, "filename": path::basename(p), "type": "file"}))
                    .collect();
                Ok(Value::Array(found))
            }
            "FS:trash" | "FS:untrash" | "FS:emptyTrash" => Ok(json!(true)),
            "FS:freeSpace" => Ok(json!(*self.free_space.lock())),
            "FS:upload" => {
                let dest = path::join(str_arg(args, "path")?, str_arg(args, "filename")?);
                let data = Self::decode(args)?;
                let size = data.len();
                self.files.lock().insert(dest.clone(), data);
                Ok(json!({"path": dest, "filename": path::basename(&dest), "type": "file", "size": size}))
            }
            other => Err(CallError::remote(404, format!("unknown method {}", other))),
        }
    }
}

#[async_trait]
impl Remote for MemoryServer {
    async fn call(&self, method: &str, args: Value, _options: CallOptions) -> Result<Value, CallError> {
        self.handle(method, &args)
    }
}

#[async_trait]
impl Channel for MemoryServer {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> Result<(), CallError> {
        *self.state.lock() = ChannelState::Connected;
        Ok(())
    }

    async fn request(&self, method: &Method, args: Value, _options: &CallOptions) -> Result<Value, CallError> {
        self.handle(&method.to_string(), &args)
    }

    fn is_online(&self) -> bool {
        *self.state.lock() != ChannelState::PermanentlyClosed
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    async fn destroy(&self) {
        *self.state.lock() = ChannelState::PermanentlyClosed;
    }
}

/// WebDAV server over an in-memory tree
///
/// Keys are paths relative to the base URL; directories end with `/`.
pub struct FakeDav {
    base_path: String,
    entries: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
    quota: Option<u64>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeDav {
    pub fn new(base_url: &str) -> Self {
        let base_path = Url::parse(base_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".into());
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), None);
        Self {
            base_path,
            entries: Mutex::new(entries),
            quota: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn put_dir(&self, rel: &str) {
        let mut entries = self.entries.lock();
        Self::insert_parents(&mut entries, rel);
        entries.insert(rel.to_string(), None);
    }

    pub fn put_file(&self, rel: &str, data: Vec<u8>) {
        let mut entries = self.entries.lock();
        Self::insert_parents(&mut entries, rel);
        entries.insert(rel.to_string(), Some(data));
    }

    pub fn has(&self, rel: &str) -> bool {
        self.entries.lock().contains_key(rel)
    }

    pub fn content(&self, rel: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(rel).cloned().flatten()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn insert_parents(entries: &mut BTreeMap<String, Option<Vec<u8>>>, rel: &str) {
        let mut parent = path::dirname(rel);
        while parent != "/" {
            entries.entry(parent.clone()).or_insert(None);
            parent = path::dirname(&parent);
        }
    }

    fn key(&self, url: &str) -> String {
        let raw = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
        let rest = raw.strip_prefix(&self.base_path).unwrap_or(&raw);
        format!("/{}", String::from_utf8_lossy(&urlencoding::decode_binary(rest.as_bytes())))
    }

    /// Existing key for a request path, with or without trailing slash
    fn lookup(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        let dir = format!("{}/", key.trim_end_matches('/'));
        if entries.contains_key(key) {
            Some(key.to_string())
        } else if entries.contains_key(&dir) {
            Some(dir)
        } else {
            None
        }
    }

    fn href(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}{}", self.base_path.trim_end_matches('/'), encoded.join("/"))
    }

    fn response_xml(&self, key: &str, data: &Option<Vec<u8>>) -> String {
        let props = match data {
            Some(bytes) => format!(
                "<d:getcontentlength>{}</d:getcontentlength><d:resourcetype/>",
                bytes.len()
            ),
            None => {
                let quota = self
                    .quota
                    .map(|q| format!("<d:quota-available-bytes>{}</d:quota-available-bytes>", q))
                    .unwrap_or_default();
                format!("<d:resourcetype><d:collection/></d:resourcetype>{}", quota)
            }
        };
        format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop>\
             <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            self.href(key),
            props
        )
    }

    fn propfind(&self, key: &str, depth: &str) -> HttpResponse {
        let Some(key) = self.lookup(key) else {
            return HttpResponse::new(404, "");
        };
        let entries = self.entries.lock();
        let mut body = String::from(r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">"#);
        body.push_str(&self.response_xml(&key, &entries[&key]));
        if depth == "1" && key.ends_with('/') {
            for (child, data) in entries.iter() {
                if child != &key && path::dirname(child) == key {
                    body.push_str(&self.response_xml(child, data));
                }
            }
        }
        body.push_str("</d:multistatus>");
        HttpResponse::new(207, body)
    }
}

#[async_trait]
impl HttpClient for FakeDav {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        self.requests.lock().push(request.clone());
        let key = self.key(&request.url);

        let response = match request.method.as_str() {
            "PROPFIND" => self.propfind(&key, request.header_value("Depth").unwrap_or("1")),
            "GET" | "HEAD" => match self.entries.lock().get(&key) {
                Some(Some(data)) if request.method == "GET" => HttpResponse::new(200, data.clone()),
                Some(Some(_)) => HttpResponse::new(200, ""),
                _ => HttpResponse::new(404, ""),
            },
            "PUT" => {
                self.put_file(&key, request.body.clone().unwrap_or_default());
                HttpResponse::new(201, "")
            }
            "MKCOL" => {
                self.put_dir(&format!("{}/", key.trim_end_matches('/')));
                HttpResponse::new(201, "")
            }
            "DELETE" => match self.lookup(&key) {
                Some(found) => {
                    let is_dir = found.ends_with('/');
                    self.entries
                        .lock()
                        .retain(|k, _| !(k == &found || (is_dir && k.starts_with(&found))));
                    HttpResponse::new(204, "")
                }
                None => HttpResponse::new(404, ""),
            },
            "COPY" | "MOVE" => {
                let dest = self.key(request.header_value("Destination").unwrap_or_default());
                let data = self.entries.lock().get(&key).cloned();
                match data {
                    Some(data) => {
                        if request.method == "MOVE" {
                            self.entries.lock().remove(&key);
                        }
                        self.entries.lock().insert(dest, data);
                        HttpResponse::new(201, "")
                    }
                    None => HttpResponse::new(404, ""),
                }
            }
            _ => HttpResponse::new(405, ""),
        };
        Ok(response)
    }
}

/// HTTP server with fixed content per URL
#[derive(Default)]
pub struct StaticHttp {
    content: Mutex<HashMap<String, Vec<u8>>>,
}

impl StaticHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.content.lock().insert(url.to_string(), body);
    }
}

#[async_trait]
impl HttpClient for StaticHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let content = self.content.lock();
        let body = match content.get(&request.url) {
            Some(body) => body,
            None => return Ok(HttpResponse::new(404, "")),
        };
        Ok(match request.method.as_str() {
            "GET" => HttpResponse::new(200, body.clone()),
            "HEAD" => HttpResponse::new(200, "").with_header("Content-Length", body.len().to_string()),
            _ => HttpResponse::new(405, ""),
        })
    }
}

/// HTTP client replaying queued responses, optionally after a delay
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().pop_front();
        next.ok_or_else(|| CallError::BackendUnavailable("connection refused".into()))
    }
}

/// In-memory backend counting every operation it serves
#[derive(Default)]
pub struct CountingBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    http: Option<Arc<StaticHttp>>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(mut self, http: Arc<StaticHttp>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn insert(&self, p: &str, data: &[u8]) {
        self.files.lock().insert(p.to_string(), data.to_vec());
    }

    pub fn content(&self, p: &str) -> Option<Vec<u8>> {
        self.files.lock().get(p).cloned()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn record(&self, operation: &'static str) {
        *self.calls.lock().entry(operation).or_default() += 1;
    }

    fn missing(p: &str) -> CallError {
        CallError::remote(404, format!("No such file: {}", p))
    }
}

#[async_trait]
impl Backend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn scandir(&self, dir: &FileRef) -> Result<Vec<FileRef>, CallError> {
        self.record("scandir");
        let dir = path::join(dir.path(), "");
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|(p, _)| path::dirname(p) == dir)
            .map(|(p, data)| FileRef::file(p.as_str()).with_size(data.len() as u64))
            .collect())
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, CallError> {
        self.record("read");
        self.content(file.path()).ok_or_else(|| Self::missing(file.path()))
    }

    async fn write(&self, file: &FileRef, data: &[u8]) -> Result<(), CallError> {
        self.record("write");
        self.insert(file.path(), data);
        Ok(())
    }

    async fn copy(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.record("copy");
        let data = self.content(src.path()).ok_or_else(|| Self::missing(src.path()))?;
        self.insert(dest.path(), &data);
        Ok(())
    }

    async fn rename(&self, src: &FileRef, dest: &FileRef) -> Result<(), CallError> {
        self.record("move");
        let data = self
            .files
            .lock()
            .remove(src.path())
            .ok_or_else(|| Self::missing(src.path()))?;
        self.insert(dest.path(), &data);
        Ok(())
    }

    async fn unlink(&self, file: &FileRef) -> Result<(), CallError> {
        self.record("unlink");
        let removed = self.files.lock().remove(file.path()).is_some();
        if removed || self.dirs.lock().remove(file.path()) {
            Ok(())
        } else {
            Err(Self::missing(file.path()))
        }
    }

    async fn mkdir(&self, dir: &FileRef) -> Result<(), CallError> {
        self.record("mkdir");
        self.dirs.lock().insert(dir.path().to_string());
        Ok(())
    }

    async fn exists(&self, file: &FileRef) -> Result<bool, CallError> {
        self.record("exists");
        Ok(self.files.lock().contains_key(file.path()) || self.dirs.lock().contains(file.path()))
    }

    async fn fileinfo(&self, file: &FileRef) -> Result<FileInfo, CallError> {
        self.record("fileinfo");
        let size = self
            .files
            .lock()
            .get(file.path())
            .map(|d| d.len() as u64)
            .ok_or_else(|| Self::missing(file.path()))?;
        Ok(FileInfo::from_ref(&FileRef::file(file.path()).with_size(size)))
    }

    async fn find(&self, dir: &FileRef, query: &FindQuery) -> Result<Vec<FileRef>, CallError> {
        self.record("find");
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|p| p.starts_with(dir.path()) && query.matches(path::basename(p)))
            .map(|p| FileRef::file(p.as_str()))
            .collect())
    }

    async fn trash(&self, _file: &FileRef) -> Result<(), CallError> {
        self.record("trash");
        Ok(())
    }

    async fn untrash(&self, _file: &FileRef) -> Result<(), CallError> {
        self.record("untrash");
        Ok(())
    }

    async fn empty_trash(&self, _root: &FileRef) -> Result<(), CallError> {
        self.record("emptyTrash");
        Ok(())
    }

    async fn free_space(&self, _root: &FileRef) -> Result<Option<u64>, CallError> {
        self.record("freeSpace");
        Ok(None)
    }

    async fn url(&self, file: &FileRef) -> Result<String, CallError> {
        self.record("url");
        let (_, rest) = path::split_scheme(file.path());
        Ok(format!("http://files.example{}", rest))
    }

    fn http(&self) -> Option<&dyn HttpClient> {
        self.http.as_ref().map(|h| h.as_ref() as &dyn HttpClient)
    }
}

/// Test side of a loopback socket
pub struct ServerEnd {
    received: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    /// Next message sent by the client
    pub async fn recv(&mut self) -> Option<String> {
        self.received.recv().await
    }

    /// Deliver a message to the client
    pub fn push(&self, text: String) {
        let _ = self.push.send(text);
    }

    /// Close the socket from the server side
    pub fn close(self) {}
}

/// Connector handing out in-process socket pairs
pub struct LoopbackConnector {
    accepting: AtomicBool,
    attempts: AtomicUsize,
    servers: Mutex<VecDeque<ServerEnd>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            servers: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Connection attempts so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Server end of the oldest connection not yet taken
    pub fn take_server(&self) -> Option<ServerEnd> {
        self.servers.lock().pop_front()
    }
}

#[async_trait]
impl SocketConnector for LoopbackConnector {
    async fn connect(&self, _url: &str) -> Result<SocketLink, CallError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CallError::BackendUnavailable("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.servers.lock().push_back(ServerEnd {
            received: out_rx,
            push: in_tx,
        });
        Ok(SocketLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
