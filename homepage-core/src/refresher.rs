use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::FeedCache;
use crate::error::RefresherError;

/// Handle to a background loop started by [`spawn_refresher`] or
/// [`spawn_sweeper`](crate::rate_limit::spawn_sweeper).
pub struct BackgroundHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl BackgroundHandle {
    pub(crate) fn new(cancel_tx: broadcast::Sender<()>, join: JoinHandle<()>) -> Self {
        Self { cancel_tx, join }
    }

    pub async fn stop(self) -> Result<(), RefresherError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(RefresherError::from)
    }
}

pub type RefresherHandle = BackgroundHandle;

/// Refreshes `cache` every `interval`, starting immediately, so readers can
/// use [`FeedCache::cached_entries`] and never wait on the network.
pub fn spawn_refresher(cache: FeedCache, interval: Duration) -> RefresherHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("feed refresher shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let entries = cache.refresh().await;
                    debug!(entries = entries.len(), "background refresh finished");
                }
            }
        }
    });

    BackgroundHandle::new(cancel_tx, join)
}
