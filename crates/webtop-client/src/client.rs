//! Client assembly
//!
//! [`WebtopClient`] owns one channel, the dispatcher on top of it, the
//! mount router and the VFS facade, all built from a [`Config`]. There is
//! no global instance: construct one and pass it to whatever needs it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use webtop_core::{
    BackendKind, CallError, Config, ConfigError, MountConfig, TransportKind, WatchEvent,
    VFS_WATCH_ACTION,
};

use crate::channel::{CallOptions, Channel, HttpChannel, SocketChannel, WsConnector};
use crate::dispatcher::Dispatcher;
use crate::events::{EventHub, Notification, SubscriptionId};
use crate::http::{HttpClient, ProxiedHttpClient, ReqwestClient};
use crate::indicator::BusyIndicator;
use crate::router::{Mount, Router};
use crate::transport::{Backend, ServerBackend, WebBackend, WebDavBackend};
use crate::vfs::Vfs;
use crate::CONNECT_TIMEOUT_SECS;

/// Errors while assembling a client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Call(#[from] CallError),
}

pub struct WebtopClient {
    config: Config,
    http: Arc<dyn HttpClient>,
    dispatcher: Arc<Dispatcher>,
    router: Arc<Router>,
    vfs: Arc<Vfs>,
    watch_subscription: SubscriptionId,
}

impl WebtopClient {
    /// Build a client with the channel selected by the configuration
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let http: Arc<dyn HttpClient> =
            Arc::new(ReqwestClient::new(Duration::from_secs(CONNECT_TIMEOUT_SECS))?);

        let channel: Arc<dyn Channel> = match config.connection.transport {
            TransportKind::Http => Arc::new(HttpChannel::new(
                &config.connection.root_uri,
                http.clone(),
                config.connection.request_timeout(),
            )?),
            TransportKind::Socket => Arc::new(SocketChannel::new(
                config.socket_url()?.to_string(),
                Arc::new(WsConnector::default()),
                config.connection.reconnect.clone(),
            )),
        };

        Self::with_channel(config, channel, http)
    }

    /// Build a client around an existing channel and HTTP client
    pub fn with_channel(
        config: Config,
        channel: Arc<dyn Channel>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ClientError> {
        let dispatcher = Arc::new(Dispatcher::new(
            channel,
            BusyIndicator::new(),
            config.connection.standalone,
        ));
        let router = Arc::new(Router::new());
        let vfs = Arc::new(Vfs::new(router.clone(), config.vfs.max_upload_size));
        let watch_subscription = forward_watch_events(dispatcher.channel().events(), &vfs);

        let client = Self {
            config,
            http,
            dispatcher,
            router,
            vfs,
            watch_subscription,
        };
        for mount in client.config.vfs.mounts.clone() {
            client.mount(mount)?;
        }
        Ok(client)
    }

    /// Connect the channel; a no-op in standalone mode
    pub async fn init(&self) -> Result<(), CallError> {
        if self.dispatcher.is_standalone() {
            info!("standalone mode, not connecting");
            return Ok(());
        }
        self.dispatcher.channel().init().await
    }

    pub async fn destroy(&self) {
        self.events().unsubscribe(self.watch_subscription);
        self.dispatcher.channel().destroy().await;
    }

    /// Instantiate the backend a mount configuration asks for
    pub fn build_backend(&self, mount: &MountConfig) -> Result<Arc<dyn Backend>, CallError> {
        let backend: Arc<dyn Backend> = match mount.transport {
            BackendKind::Server => Arc::new(ServerBackend::new(
                self.dispatcher.clone(),
                self.http.clone(),
                self.config.connection.fs_uri.as_str(),
            )),
            BackendKind::WebDav => {
                let http: Arc<dyn HttpClient> = if mount.options.cors {
                    self.http.clone()
                } else {
                    Arc::new(ProxiedHttpClient::new(self.dispatcher.clone()))
                };
                Arc::new(WebDavBackend::new(mount, http)?)
            }
            BackendKind::Web => Arc::new(WebBackend::new(self.http.clone())),
        };
        Ok(backend)
    }

    pub fn mount(&self, config: MountConfig) -> Result<(), CallError> {
        let backend = self.build_backend(&config)?;
        self.router.mount(Mount::new(config, backend))
    }

    pub fn unmount(&self, name: &str) -> bool {
        self.router.unmount(name)
    }

    /// Issue an API or `FS:` call with default options
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, CallError> {
        self.dispatcher.call(method, args, CallOptions::default()).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn events(&self) -> &EventHub {
        self.dispatcher.channel().events()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.events().notifications()
    }

    pub fn is_online(&self) -> bool {
        !self.dispatcher.is_standalone() && self.dispatcher.channel().is_online()
    }
}

/// Route server `vfs:watch` pushes to the VFS watchers
fn forward_watch_events(events: &EventHub, vfs: &Arc<Vfs>) -> SubscriptionId {
    let vfs: Weak<Vfs> = Arc::downgrade(vfs);
    events.subscribe(VFS_WATCH_ACTION, move |args| {
        let Some(vfs) = vfs.upgrade() else {
            return;
        };
        match serde_json::from_value::<WatchEvent>(args.clone()) {
            Ok(event) => vfs.notify(&event),
            Err(e) => warn!("ignoring malformed {} push: {}", VFS_WATCH_ACTION, e),
        }
    })
}
