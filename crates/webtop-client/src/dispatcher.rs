//! Remote call dispatcher
//!
//! Single entry point for API and filesystem calls. Checks the
//! connectivity mode before any network I/O, holds a busy-indicator
//! registration for the duration of the call, and forwards to the active
//! [`Channel`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use webtop_core::{CallError, Method};

use crate::channel::{CallOptions, Channel};
use crate::indicator::BusyIndicator;

/// Anything that can perform a named remote call
#[async_trait]
pub trait Remote: Send + Sync {
    async fn call(&self, method: &str, args: Value, options: CallOptions)
        -> Result<Value, CallError>;

    /// Whether a call issued now would be allowed to reach the network
    fn is_available(&self) -> bool {
        true
    }
}

pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    indicator: BusyIndicator,
    standalone: bool,
    sequence: AtomicU64,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn Channel>, indicator: BusyIndicator, standalone: bool) -> Self {
        Self {
            channel,
            indicator,
            standalone,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn indicator(&self) -> &BusyIndicator {
        &self.indicator
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    /// False in standalone mode or while the channel is offline
    pub fn is_available(&self) -> bool {
        !self.standalone && self.channel.is_online()
    }

    /// Perform a remote call
    ///
    /// `method` is an API method name, or `FS:<name>` for filesystem calls.
    /// `args` must be a JSON object (or null for no arguments).
    pub async fn call(
        &self,
        method: &str,
        args: Value,
        options: CallOptions,
    ) -> Result<Value, CallError> {
        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => args,
            other => {
                return Err(CallError::InvalidArgument(format!(
                    "arguments to {} must be an object, got {}",
                    method, other
                )))
            }
        };

        if !self.is_available() {
            debug!("refusing {}: no connectivity", method);
            return Err(CallError::ConnectivityUnavailable);
        }

        let method = Method::parse(method);
        let label = format!("{}#{}", method, self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let _busy = options.indicator.then(|| self.indicator.begin(&label));

        debug!("call {} via {}", label, self.channel.name());
        self.channel.request(&method, args, &options).await
    }

    /// Perform a call and decode its result
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Value,
        options: CallOptions,
    ) -> Result<T, CallError> {
        let value = self.call(method, args, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Perform a call in the background and hand the outcome to `callback`
    pub fn call_with<F>(
        self: &Arc<Self>,
        method: &str,
        args: Value,
        options: CallOptions,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Value, CallError>) + Send + 'static,
    {
        let this = Arc::clone(self);
        let method = method.to_string();
        tokio::spawn(async move {
            let outcome = this.call(&method, args, options).await;
            callback(outcome);
        })
    }
}

#[async_trait]
impl Remote for Dispatcher {
    async fn call(
        &self,
        method: &str,
        args: Value,
        options: CallOptions,
    ) -> Result<Value, CallError> {
        Dispatcher::call(self, method, args, options).await
    }

    fn is_available(&self) -> bool {
        Dispatcher::is_available(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{connectivity, HttpChannel};
    use crate::http::HttpResponse;
    use crate::testing::ScriptedHttp;
    use serde_json::json;

    fn dispatcher(http: Arc<ScriptedHttp>, standalone: bool) -> Dispatcher {
        let channel = HttpChannel::new("http://localhost:8000/", http, None).unwrap();
        Dispatcher::new(Arc::new(channel), BusyIndicator::new(), standalone)
    }

    #[tokio::test]
    async fn test_call_forwards_to_channel() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"result":{"ok":true}}"#));
        let d = dispatcher(http.clone(), false);

        let result = d.call("FS:exists", json!({"path": "home:///a"}), CallOptions::default()).await;
        assert_eq!(result.unwrap(), json!({"ok": true}));
        assert_eq!(http.requests()[0].url, "http://localhost:8000/FS/exists");
        assert_eq!(d.indicator().active(), 0);
    }

    #[tokio::test]
    async fn test_standalone_refuses_without_io() {
        let http = Arc::new(ScriptedHttp::new());
        let d = dispatcher(http.clone(), true);
        let err = d.call("login", json!({}), CallOptions::default()).await.unwrap_err();
        assert_eq!(err, CallError::ConnectivityUnavailable);
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_offline_refuses_without_io() {
        let http = Arc::new(ScriptedHttp::new());
        let (_handle, signal) = connectivity(false);
        let channel = HttpChannel::new("http://localhost:8000/", http.clone(), None)
            .unwrap()
            .with_connectivity(signal);
        let d = Dispatcher::new(Arc::new(channel), BusyIndicator::new(), false);

        let err = d.call("FS:read", json!({}), CallOptions::default()).await.unwrap_err();
        assert_eq!(err, CallError::ConnectivityUnavailable);
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_args_rejected() {
        let d = dispatcher(Arc::new(ScriptedHttp::new()), false);
        let err = d.call("x", json!([1, 2]), CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_indicator_released_on_failure() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(500, r#"{"error":"boom"}"#));
        let d = dispatcher(http, false);

        let err = d.call("x", Value::Null, CallOptions::default()).await.unwrap_err();
        assert_eq!(err, CallError::remote(500, "boom"));
        assert_eq!(d.indicator().active(), 0);
    }

    #[tokio::test]
    async fn test_call_as_decodes() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"result":[1,2,3]}"#));
        let d = dispatcher(http, false);
        let v: Vec<u32> = d.call_as("list", json!({}), CallOptions::default()).await.unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_call_with_invokes_callback() {
        let http = Arc::new(ScriptedHttp::new());
        http.push(HttpResponse::new(200, r#"{"result":"done"}"#));
        let d = Arc::new(dispatcher(http, false));

        let (tx, rx) = tokio::sync::oneshot::channel();
        d.call_with("x", json!({}), CallOptions::default().without_indicator(), move |r| {
            let _ = tx.send(r);
        })
        .await
        .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
    }
}
