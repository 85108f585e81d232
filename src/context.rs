//! Process-scoped application context
//!
//! Owns the shared mutable state of the client — session manager, request
//! gateway, cached view store, and the optional live channel — behind an
//! explicit init/teardown contract instead of ambient globals.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::ApiService;
use crate::auth::{CredentialStore, SessionManager};
use crate::config::AppConfig;
use crate::gateway::Gateway;
use crate::sync::cache::CacheStore;
use crate::sync::channel::{ChannelConfig, ChannelState, LiveChannel};
use crate::sync::spawn_apply_task;

/// Live channel plus its dedicated cache-apply task
struct LiveHandle {
    channel: LiveChannel,
    apply_task: JoinHandle<()>,
}

pub struct AppContext {
    pub config: AppConfig,
    pub session: SessionManager,
    pub gateway: Gateway,
    pub cache: Arc<CacheStore>,
    pub api: ApiService,
    live: Mutex<Option<LiveHandle>>,
}

impl AppContext {
    /// Build the context and restore any persisted session.
    pub async fn init(config: AppConfig, store: CredentialStore) -> Result<Arc<Self>> {
        let endpoints = config.endpoints();
        let session = SessionManager::new(endpoints.clone(), store)?;
        if let Some(user) = session.restore().await? {
            info!(username = %user.username, "Session restored");
        }

        let gateway = Gateway::new(endpoints, session.clone())?;
        let cache = Arc::new(CacheStore::new());
        let api = ApiService::new(gateway.clone(), Arc::clone(&cache));

        Ok(Arc::new(Self {
            config,
            session,
            gateway,
            cache,
            api,
            live: Mutex::new(None),
        }))
    }

    /// Start the live update channel and its apply task. Idempotent: a
    /// second call while one is running is a no-op.
    pub async fn start_live_updates(&self) -> tokio::sync::watch::Receiver<ChannelState> {
        let mut live = self.live.lock().await;
        if let Some(handle) = live.as_ref() {
            return handle.channel.state();
        }

        let channel_config = ChannelConfig {
            url: self.config.ws_url.clone(),
            ..ChannelConfig::default()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::connect(channel_config, events_tx);
        let apply_task = spawn_apply_task(Arc::clone(&self.cache), events_rx);
        let state = channel.state();

        *live = Some(LiveHandle {
            channel,
            apply_task,
        });
        state
    }

    /// Handle to the running live channel, if any.
    pub async fn live_channel_state(&self) -> Option<tokio::sync::watch::Receiver<ChannelState>> {
        self.live.lock().await.as_ref().map(|h| h.channel.state())
    }

    /// Publish a price update over the live channel (data-admin clients).
    pub async fn publish_price_update(
        &self,
        update: crate::sync::cache::PriceUpdate,
    ) -> Result<()> {
        let live = self.live.lock().await;
        let handle = live
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("live channel is not running"))?;
        handle.channel.publish_price_update(update)?;
        Ok(())
    }

    /// Deliberately close the live channel and stop the apply task, then
    /// drop cached state. In-flight requests are left to finish naturally.
    pub async fn teardown(&self) {
        let mut live = self.live.lock().await;
        if let Some(handle) = live.take() {
            let _ = handle.channel.close();
            // The apply task ends once the channel task drops its sender.
            let _ = handle.apply_task.await;
        }
        self.cache.clear();
        info!("Context torn down");
    }
}
