//! Request/response channel
//!
//! Every call is exactly one POST to `<root>/API/<method>` or
//! `<root>/FS/<method>` with the arguments as a JSON body. There is no
//! persistent state and no reconnect logic: the online flag follows the
//! injected connectivity signal, never the outcome of exchanges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use webtop_core::{CallError, ChannelState, ConnectionState, Method, ReplyBody};

use super::{CallOptions, Channel, ConnectivitySignal};
use crate::events::{EventHub, Notification};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

pub struct HttpChannel {
    root: Url,
    http: Arc<dyn HttpClient>,
    default_timeout: Option<Duration>,
    online: Arc<AtomicBool>,
    state: Mutex<ChannelState>,
    events: EventHub,
    signal: Mutex<Option<ConnectivitySignal>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HttpChannel {
    pub fn new(
        root_uri: &str,
        http: Arc<dyn HttpClient>,
        default_timeout: Option<Duration>,
    ) -> Result<Self, CallError> {
        let mut root = Url::parse(root_uri)
            .map_err(|e| CallError::InvalidArgument(format!("root uri {}: {}", root_uri, e)))?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        Ok(Self {
            root,
            http,
            default_timeout,
            online: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(ChannelState::Disconnected),
            events: EventHub::new(),
            signal: Mutex::new(None),
            watcher: Mutex::new(None),
        })
    }

    /// Follow the host environment's connectivity signal
    pub fn with_connectivity(self, signal: ConnectivitySignal) -> Self {
        self.online.store(signal.is_online(), Ordering::SeqCst);
        *self.signal.lock() = Some(signal);
        self
    }

    /// URL a method is posted to
    pub fn endpoint(&self, method: &Method) -> Result<Url, CallError> {
        self.root
            .join(method.wire_path().trim_start_matches('/'))
            .map_err(|e| CallError::InvalidArgument(format!("method {}: {}", method, e)))
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        options: &CallOptions,
    ) -> Result<HttpResponse, CallError> {
        let timeout = options.timeout.or(self.default_timeout);
        let exchange = async {
            match timeout {
                Some(t) => tokio::time::timeout(t, self.http.execute(request))
                    .await
                    .map_err(|_| CallError::Timeout)?,
                None => self.http.execute(request).await,
            }
        };

        match &options.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(CallError::Canceled),
                result = exchange => result,
            },
            None => exchange.await,
        }
    }
}

fn parse_reply(response: HttpResponse) -> Result<Value, CallError> {
    if !response.is_success() {
        // Servers usually still send the `{error}` body on failure statuses.
        if let Ok(ReplyBody { error: Some(e), .. }) =
            serde_json::from_slice::<ReplyBody>(&response.body)
        {
            return match CallError::from(e) {
                CallError::Remote { message, .. } => Err(CallError::remote(response.status, message)),
                other => Err(other),
            };
        }
    }

    let response = response.error_for_status()?;
    let body: ReplyBody = serde_json::from_slice(&response.body)
        .map_err(|e| CallError::Protocol(format!("invalid reply body: {}", e)))?;
    body.into_result()
}

fn watch_connectivity(
    mut signal: ConnectivitySignal,
    online: Arc<AtomicBool>,
    events: EventHub,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(now_online) = signal.changed().await {
            let was_online = online.swap(now_online, Ordering::SeqCst);
            if was_online == now_online {
                continue;
            }
            if now_online {
                info!("connectivity restored");
                events.transition(ConnectionState::Online, 0);
                events.notify(Notification::ConnectionRestored);
            } else {
                warn!("connectivity lost");
                events.transition(ConnectionState::Offline, 0);
                events.notify(Notification::ConnectionLost);
            }
        }
        debug!("connectivity signal closed");
    })
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn init(&self) -> Result<(), CallError> {
        {
            let mut state = self.state.lock();
            match *state {
                ChannelState::PermanentlyClosed => {
                    return Err(CallError::BackendUnavailable("channel destroyed".into()))
                }
                ChannelState::Connected => return Ok(()),
                _ => *state = ChannelState::Connected,
            }
        }

        if let Some(signal) = self.signal.lock().take() {
            let handle = watch_connectivity(signal, self.online.clone(), self.events.clone());
            *self.watcher.lock() = Some(handle);
        }

        info!("http channel ready at {}", self.root);
        Ok(())
    }

    async fn request(
        &self,
        method: &Method,
        args: Value,
        options: &CallOptions,
    ) -> Result<Value, CallError> {
        if *self.state.lock() == ChannelState::PermanentlyClosed {
            return Err(CallError::BackendUnavailable("channel destroyed".into()));
        }
        let url = self.endpoint(method)?;
        let request = HttpRequest::post(url.as_str()).json(&args)?;
        debug!("POST {}", url);

        let response = self.exchange(request, options).await?;
        parse_reply(response)
    }

    fn is_online(&self) -> bool {
        *self.state.lock() != ChannelState::PermanentlyClosed && self.online.load(Ordering::SeqCst)
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    async fn destroy(&self) {
        *self.state.lock() = ChannelState::PermanentlyClosed;
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        info!("http channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::connectivity;
    use crate::testing::ScriptedHttp;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn channel(http: Arc<ScriptedHttp>) -> HttpChannel {
        HttpChannel::new("http://localhost:8000/", http, None).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let ch = channel(Arc::new(ScriptedHttp::new()));
        assert_eq!(
            ch.endpoint(&Method::parse("FS:scandir")).unwrap().as_str(),
            "http://localhost:8000/FS/scandir"
        );
        assert_eq!(
            ch.endpoint(&Method::parse("login")).unwrap().as_str(),
            "http://localhost:8000/API/login"
        );

        let nested =
            HttpChannel::new("http://host/desk", Arc::new(ScriptedHttp::new()), None).unwrap();
        assert_eq!(
            nested.endpoint(&Method::parse("FS:read")).unwrap().as_str(),
            "http://host/desk/FS/read"
        );
    }

    #[tokio::test]
    async fn test_request_posts_json_and_returns_result() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"error":null,"result":{"files":3}}"#));
        let ch = channel(http.clone());
        ch.init().await.unwrap();

        let result = ch
            .request(&Method::parse("FS:scandir"), json!({"path": "home:///"}), &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"files": 3}));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "http://localhost:8000/FS/scandir");
        let body: Value = serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"path": "home:///"}));
    }

    #[tokio::test]
    async fn test_server_error_reply() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"error":"access denied","result":null}"#));
        http.push(HttpResponse::new(403, r#"{"error":"forbidden"}"#));
        http.push(HttpResponse::new(502, "bad gateway"));
        let ch = channel(http);

        let opts = CallOptions::default();
        let m = Method::parse("x");
        assert_eq!(
            ch.request(&m, json!({}), &opts).await.unwrap_err(),
            CallError::remote(500, "access denied")
        );
        assert_eq!(
            ch.request(&m, json!({}), &opts).await.unwrap_err(),
            CallError::remote(403, "forbidden")
        );
        assert_eq!(
            ch.request(&m, json!({}), &opts).await.unwrap_err(),
            CallError::remote(502, "bad gateway")
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, "<html>"));
        let ch = channel(http);
        let err = ch
            .request(&Method::parse("x"), json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_server_error() {
        let http = Arc::new(ScriptedHttp::new().with_delay(Duration::from_secs(60)));
        http.push(HttpResponse::new(200, r#"{"result":1}"#));
        let ch = channel(http);

        let opts = CallOptions::default().with_timeout(Some(Duration::from_secs(1)));
        let err = ch.request(&Method::parse("slow"), json!({}), &opts).await.unwrap_err();
        assert_eq!(err, CallError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_exchange() {
        let http = Arc::new(ScriptedHttp::new().with_delay(Duration::from_secs(60)));
        http.push(HttpResponse::new(200, r#"{"result":1}"#));
        let ch = channel(http);

        let token = CancellationToken::new();
        let opts = CallOptions::default().with_cancel(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = ch.request(&Method::parse("slow"), json!({}), &opts).await.unwrap_err();
        assert_eq!(err, CallError::Canceled);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_online_follows_connectivity_signal() {
        let (handle, signal) = connectivity(true);
        let ch = channel(Arc::new(ScriptedHttp::new())).with_connectivity(signal);
        let mut notes = ch.events().notifications();
        ch.init().await.unwrap();
        assert!(ch.is_online());

        handle.set_online(false);
        assert_eq!(notes.recv().await.unwrap(), Notification::ConnectionLost);
        assert!(!ch.is_online());

        handle.set_online(true);
        assert_eq!(notes.recv().await.unwrap(), Notification::ConnectionRestored);
        assert!(ch.is_online());

        ch.destroy().await;
        assert_eq!(ch.state(), ChannelState::PermanentlyClosed);
    }

    #[tokio::test]
    async fn test_destroyed_channel_performs_no_exchange() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"result":"late"}"#));
        let ch = channel(http.clone());
        ch.init().await.unwrap();
        ch.destroy().await;

        assert!(!ch.is_online());
        let err = ch
            .request(&Method::parse("x"), json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::BackendUnavailable(_)));
        assert!(http.requests().is_empty());
        assert!(ch.init().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_exchange_does_not_flip_online() {
        let http = Arc::new(ScriptedHttp::new());
        let ch = channel(http);
        ch.init().await.unwrap();
        // No scripted response: the fake reports the backend as unreachable.
        let err = ch
            .request(&Method::parse("x"), json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::BackendUnavailable(_)));
        assert!(ch.is_online());
    }
}
