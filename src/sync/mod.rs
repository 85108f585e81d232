//! Real-time data synchronization core: the cached view store and the
//! live update channel that patches it.

pub mod cache;
pub mod channel;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cache::{CacheStore, PriceUpdate};

/// Drain price events into the cache from a single dedicated task.
///
/// Decouples network delivery from cache mutation: the channel only ever
/// produces events, and synthetic events can be injected in tests without
/// a socket. The task ends when every sender is gone.
pub fn spawn_apply_task(
    cache: Arc<CacheStore>,
    mut events: mpsc::UnboundedReceiver<PriceUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = events.recv().await {
            let patched = cache.apply_price_update(&update);
            debug!(
                asset_id = update.asset_id,
                patched, "Price event applied to cache"
            );
        }
        info!("Price event stream ended");
    })
}
