use std::sync::atomic::{AtomicU64, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::feed::{parse_feed, FeedEntry, FeedSource};
use crate::fetch::FeedFetcher;

/// The aggregated feed state. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSnapshot {
    pub version: u32,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Newest `sort_key` first.
    pub entries: Vec<FeedEntry>,
}

impl CacheSnapshot {
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            last_refreshed_at: None,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Fetched { entries: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
}

/// What happened to each source during one refresh attempt.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    /// Whether the attempt replaced the snapshot.
    pub installed: bool,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Fetched { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.sources.len() - self.succeeded()
    }
}

/// Shared handle to the process-wide feed snapshot.
///
/// Reads are served from the snapshot while it is younger than the refresh
/// interval. Past that, the reader refreshes synchronously; a refresh that
/// yields nothing leaves the old snapshot (and its timestamp) untouched so
/// the next read retries.
#[derive(Clone)]
pub struct FeedCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: FeedConfig,
    fetcher: Arc<dyn FeedFetcher>,
    clock: SharedClock,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    refresh_gate: Mutex<()>,
    attempts: AtomicU64,
    last_report: RwLock<Option<Arc<RefreshReport>>>,
}

impl FeedCache {
    pub fn new(config: FeedConfig, fetcher: Arc<dyn FeedFetcher>, clock: SharedClock) -> Self {
        let snapshot = CacheSnapshot::empty(config.cache_version);
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                clock,
                snapshot: RwLock::new(Arc::new(snapshot)),
                refresh_gate: Mutex::new(()),
                attempts: AtomicU64::new(0),
                last_report: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// Current entries, refreshing first when the snapshot is stale.
    /// Never fails: on a failed refresh the previous entries are returned.
    pub async fn get_entries(&self) -> Vec<FeedEntry> {
        let snapshot = self.snapshot().await;
        if self.is_fresh(&snapshot) {
            return snapshot.entries.clone();
        }

        let seen_attempts = self.inner.attempts.load(Ordering::Acquire);
        let _gate = self.inner.refresh_gate.lock().await;

        // Someone else refreshed while we queued on the gate; take their result.
        if self.inner.attempts.load(Ordering::Acquire) != seen_attempts {
            return self.snapshot().await.entries.clone();
        }
        let snapshot = self.snapshot().await;
        if self.is_fresh(&snapshot) {
            return snapshot.entries.clone();
        }

        self.refresh_locked().await
    }

    /// Entries as currently cached, without ever touching the network.
    pub async fn cached_entries(&self) -> Vec<FeedEntry> {
        self.snapshot().await.entries.clone()
    }

    /// Forces a refresh of every source. Returns the new entries, or the
    /// previous ones if every source failed.
    pub async fn refresh(&self) -> Vec<FeedEntry> {
        let _gate = self.inner.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// The live snapshot. A snapshot from another cache version is dropped
    /// here and replaced by an empty one.
    pub async fn snapshot(&self) -> Arc<CacheSnapshot> {
        let expected = self.inner.config.cache_version;
        {
            let current = self.inner.snapshot.read().await;
            if current.version == expected {
                return Arc::clone(&current);
            }
        }

        let mut current = self.inner.snapshot.write().await;
        if current.version != expected {
            info!(
                found = current.version,
                expected, "cache version changed, discarding snapshot"
            );
            *current = Arc::new(CacheSnapshot::empty(expected));
        }
        Arc::clone(&current)
    }

    /// Installs a previously captured snapshot, e.g. to warm the cache at
    /// start-up. It is still subject to the version check on read.
    pub async fn install_snapshot(&self, snapshot: CacheSnapshot) {
        *self.inner.snapshot.write().await = Arc::new(snapshot);
    }

    pub async fn last_report(&self) -> Option<Arc<RefreshReport>> {
        self.inner.last_report.read().await.clone()
    }

    fn is_fresh(&self, snapshot: &CacheSnapshot) -> bool {
        if snapshot.entries.is_empty() {
            return false;
        }
        let Some(refreshed_at) = snapshot.last_refreshed_at else {
            return false;
        };
        let interval = chrono::Duration::seconds(
            i64::try_from(self.inner.config.refresh_interval_seconds).unwrap_or(i64::MAX),
        );
        self.inner.clock.now() - refreshed_at < interval
    }

    // Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Vec<FeedEntry> {
        let before = self.snapshot().await;
        let started_at = self.inner.clock.now();
        let (entries, sources) = self.collect(started_at).await;

        let installed = !entries.is_empty();
        let report = RefreshReport {
            started_at,
            sources,
            installed,
        };

        let result = if installed {
            info!(
                entries = entries.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "feed cache refreshed"
            );
            let snapshot = Arc::new(CacheSnapshot {
                version: self.inner.config.cache_version,
                last_refreshed_at: Some(started_at),
                entries,
            });
            *self.inner.snapshot.write().await = Arc::clone(&snapshot);
            snapshot.entries.clone()
        } else {
            warn!(
                failed = report.failed(),
                stale_entries = before.entries.len(),
                "every feed source failed, keeping previous snapshot"
            );
            before.entries.clone()
        };

        *self.inner.last_report.write().await = Some(Arc::new(report));
        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn collect(&self, now: DateTime<Utc>) -> (Vec<FeedEntry>, Vec<SourceReport>) {
        let sources = &self.inner.config.sources;
        let deadline = self.inner.config.refresh_deadline();
        let fetches = sources
            .iter()
            .map(|source| within_deadline(deadline, self.fetch_source(source, now)));
        let results = join_all(fetches).await;

        let mut entries = Vec::new();
        let mut reports = Vec::with_capacity(sources.len());
        for (source, result) in sources.iter().zip(results) {
            let outcome = match result {
                Ok(mut fetched) => {
                    let outcome = SourceOutcome::Fetched {
                        entries: fetched.len(),
                    };
                    entries.append(&mut fetched);
                    outcome
                }
                Err(err) => {
                    warn!(source = %source.name, url = %source.url, error = %err, "failed to fetch feed");
                    SourceOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            reports.push(SourceReport {
                source: source.name.clone(),
                outcome,
            });
        }

        // Stable: equal keys keep source order.
        entries.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));
        (entries, reports)
    }

    async fn fetch_source(
        &self,
        source: &FeedSource,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeedEntry>, FetchError> {
        let timeout = self.inner.config.request_timeout();
        let bytes = match tokio::time::timeout(timeout, self.inner.fetcher.fetch(source)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(timeout)),
        };

        let raw = parse_feed(&bytes)?;
        let entries: Vec<FeedEntry> = raw
            .iter()
            .take(self.inner.config.max_entries_per_source)
            .map(|item| FeedEntry::from_raw(source, item, now, self.inner.config.summary_max_chars))
            .collect();
        debug!(source = %source.name, entries = entries.len(), "fetched feed");
        Ok(entries)
    }
}

/// Each source gets the whole-refresh deadline on its own, so one slow
/// source never discards the others' results.
async fn within_deadline<T>(
    deadline: Duration,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(deadline, fetch).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?deadline, "feed source exceeded the refresh deadline");
            Err(FetchError::Timeout(deadline))
        }
    }
}

impl std::fmt::Debug for FeedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCache")
            .field("sources", &self.inner.config.sources.len())
            .field("cache_version", &self.inner.config.cache_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_only_the_late_source() {
        let deadline = Duration::from_secs(5);
        let (quick, stuck) = tokio::join!(
            within_deadline(deadline, async { Ok::<_, FetchError>(3) }),
            within_deadline(deadline, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, FetchError>(7)
            }),
        );

        assert!(matches!(quick, Ok(3)));
        assert!(matches!(stuck, Err(FetchError::Timeout(d)) if d == deadline));
    }
}
