use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::refresher::BackgroundHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    identity: String,
    window: i64,
}

/// Per-identity attempt counter over fixed windows of `window_seconds`.
///
/// Windows are aligned to the epoch (`floor(now / window)`), so an identity
/// can land up to twice the limit across a window boundary.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    window_secs: i64,
    max_attempts: usize,
    sweep_after_secs: i64,
    max_tracked_keys: usize,
    clock: SharedClock,
    windows: DashMap<WindowKey, Vec<DateTime<Utc>>>,
    last_sweep: AtomicI64,
    /// Keys left after the last sweep. An over-cap sweep waits until the map
    /// has doubled past this, so admission stays amortized O(1).
    swept_len: AtomicUsize,
    sweeps: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: SharedClock) -> Self {
        let last_sweep = clock.now().timestamp();
        Self {
            inner: Arc::new(LimiterInner {
                window_secs: i64::try_from(config.window_seconds).unwrap_or(i64::MAX).max(1),
                max_attempts: config.max_attempts.max(1),
                sweep_after_secs: i64::try_from(config.sweep_after_seconds).unwrap_or(i64::MAX),
                max_tracked_keys: config.max_tracked_keys.max(1),
                clock,
                windows: DashMap::new(),
                last_sweep: AtomicI64::new(last_sweep),
                swept_len: AtomicUsize::new(0),
                sweeps: AtomicU64::new(0),
            }),
        }
    }

    /// Records an attempt for `identity` if it is still under the limit.
    pub fn try_acquire(&self, identity: &str) -> bool {
        self.try_acquire_at(identity, self.inner.clock.now())
    }

    pub fn try_acquire_at(&self, identity: &str, now: DateTime<Utc>) -> bool {
        self.maybe_sweep(now);

        let key = WindowKey {
            identity: identity.to_owned(),
            window: self.window_index(now),
        };
        let window = chrono::Duration::seconds(self.inner.window_secs);

        let mut attempts = self.inner.windows.entry(key).or_default();
        attempts.retain(|at| now - *at < window);

        if attempts.len() < self.inner.max_attempts {
            attempts.push(now);
            true
        } else {
            debug!(identity, attempts = attempts.len(), "rate limited");
            false
        }
    }

    /// Seconds until the current window closes.
    pub fn retry_after_secs(&self) -> u64 {
        let now = self.inner.clock.now().timestamp();
        let remaining = self.inner.window_secs - now.rem_euclid(self.inner.window_secs);
        u64::try_from(remaining).unwrap_or(1).max(1)
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.windows.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(self.inner.clock.now())
    }

    /// Drops windows that ended more than `sweep_after_seconds` ago. Over the
    /// key cap, every window but the current one goes.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let current = self.window_index(now);
        let horizon = now.timestamp().saturating_sub(self.inner.sweep_after_secs);
        let over_cap = self.inner.windows.len() > self.inner.max_tracked_keys;
        let window_secs = self.inner.window_secs;

        let before = self.inner.windows.len();
        self.inner.windows.retain(|key, _| {
            if over_cap {
                key.window >= current
            } else {
                (key.window + 1).saturating_mul(window_secs) > horizon
            }
        });
        let remaining = self.inner.windows.len();
        let removed = before.saturating_sub(remaining);
        self.inner.swept_len.store(remaining, Ordering::Release);
        self.inner.sweeps.fetch_add(1, Ordering::Relaxed);

        if remaining > self.inner.max_tracked_keys {
            warn!(
                remaining,
                cap = self.inner.max_tracked_keys,
                "rate limiter still over key cap after sweep"
            );
        }
        debug!(removed, remaining, "rate limiter sweep");
        removed
    }

    fn window_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.inner.window_secs)
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_secs = now.timestamp();
        let last = self.inner.last_sweep.load(Ordering::Acquire);
        let window_due = now_secs - last >= self.inner.window_secs
            && self
                .inner
                .last_sweep
                .compare_exchange(last, now_secs, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        let len = self.inner.windows.len();
        let swept = self.inner.swept_len.load(Ordering::Acquire);
        let cap_due = !window_due
            && len > self.inner.max_tracked_keys
            && len >= swept.saturating_mul(2)
            && self
                .inner
                .swept_len
                .compare_exchange(swept, len, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        if window_due || cap_due {
            self.sweep_at(now);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window_secs", &self.inner.window_secs)
            .field("max_attempts", &self.inner.max_attempts)
            .field("tracked_keys", &self.inner.windows.len())
            .finish_non_exhaustive()
    }
}

pub type SweeperHandle = BackgroundHandle;

/// Sweeps `limiter` every `interval` in the background.
pub fn spawn_sweeper(limiter: RateLimiter, interval: Duration) -> SweeperHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("rate limiter sweeper shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    limiter.sweep();
                }
            }
        }
    });

    BackgroundHandle::new(cancel_tx, join)
}
