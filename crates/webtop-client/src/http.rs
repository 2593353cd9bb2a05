//! HTTP client seam
//!
//! Backends and the request/response channel talk HTTP through the
//! [`HttpClient`] trait so they can be exercised without a network stack.
//! [`ReqwestClient`] is the real implementation; [`ProxiedHttpClient`]
//! tunnels requests through the application server for hosts the client
//! may not contact directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use webtop_core::CallError;

use crate::channel::CallOptions;
use crate::dispatcher::Remote;
use crate::PROXY_METHOD;

/// An HTTP request, verb kept as a string so WebDAV verbs pass through
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(self, value: &Value) -> Result<Self, CallError> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of a request header, case-insensitive
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response with its body fully read
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of a response header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Map a non-2xx response to a remote error carrying the status
    pub fn error_for_status(self) -> Result<Self, CallError> {
        if self.is_success() {
            Ok(self)
        } else {
            let message = match self.text().trim() {
                "" => format!("HTTP {}", self.status),
                text => text.chars().take(512).collect(),
            };
            Err(CallError::remote(self.status, message))
        }
    }
}

/// Performs one HTTP exchange
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError>;
}

/// Fetch the bytes behind a URL
pub async fn fetch_bytes(http: &dyn HttpClient, url: &str) -> Result<Vec<u8>, CallError> {
    let response = http.execute(HttpRequest::get(url)).await?.error_for_status()?;
    Ok(response.body)
}

/// [`HttpClient`] backed by a shared `reqwest::Client`
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(connect_timeout: Duration) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CallError::BackendUnavailable(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            CallError::InvalidArgument(format!("invalid http method {}", request.method))
        })?;

        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout
    } else {
        CallError::BackendUnavailable(e.to_string())
    }
}

/// Reply of the server's proxy method
#[derive(Debug, Deserialize)]
struct ProxyReply {
    #[serde(rename = "httpCode")]
    http_code: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Base64-encoded response body
    #[serde(default)]
    body: String,
}

/// [`HttpClient`] that asks the application server to perform the exchange
///
/// Used for remote hosts that do not allow cross-origin access.
pub struct ProxiedHttpClient {
    remote: Arc<dyn Remote>,
}

impl ProxiedHttpClient {
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl HttpClient for ProxiedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let headers: BTreeMap<&str, &str> = request
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let args = json!({
            "url": request.url,
            "method": request.method,
            "requestHeaders": headers,
            "body": request.body.as_deref().map(|b| BASE64.encode(b)),
            "binary": true,
        });

        let options = CallOptions::default()
            .without_indicator()
            .with_timeout(request.timeout);
        let result = self.remote.call(PROXY_METHOD, args, options).await?;
        let reply: ProxyReply = serde_json::from_value(result)?;
        let body = BASE64
            .decode(reply.body.as_bytes())
            .map_err(|e| CallError::Protocol(format!("proxied body: {}", e)))?;

        Ok(HttpResponse {
            status: reply.http_code,
            headers: reply.headers.into_iter().collect(),
            body,
        })
    }
}
