mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use homepage_core::{
    CacheSnapshot, FeedCache, FeedEntry, ManualClock, SourceOutcome, CACHE_VERSION,
};

use common::{arc, feed_config, rss, source, Reply, ScriptedFetcher};

const JAN_1: &str = "Wed, 01 Jan 2025 09:00:00 GMT";
const JAN_2: &str = "Thu, 02 Jan 2025 09:00:00 GMT";
const JAN_3: &str = "Fri, 03 Jan 2025 09:00:00 GMT";

fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap())
}

fn two_source_cache() -> (FeedCache, Arc<ScriptedFetcher>, ManualClock) {
    let alpha = source("Alpha");
    let beta = source("Beta");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.reply(&alpha.url, Reply::Feed(rss(&[("Alpha One", JAN_1), ("Alpha Three", JAN_3)])));
    fetcher.reply(&beta.url, Reply::Feed(rss(&[("Beta Two", JAN_2)])));

    let clock = start_clock();
    let cache = FeedCache::new(
        feed_config(vec![alpha, beta]),
        arc(&fetcher),
        Arc::new(clock.clone()),
    );
    (cache, fetcher, clock)
}

fn titles(entries: &[FeedEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.title.as_str()).collect()
}

#[tokio::test]
async fn reads_within_interval_do_not_fetch() {
    let (cache, fetcher, clock) = two_source_cache();

    let first = cache.get_entries().await;
    assert_eq!(first.len(), 3);
    assert_eq!(fetcher.calls(), 2);

    for _ in 0..5 {
        clock.advance(chrono::Duration::seconds(100));
        let again = cache.get_entries().await;
        assert_eq!(again, first);
    }
    clock.advance(chrono::Duration::seconds(399));
    cache.get_entries().await;
    assert_eq!(fetcher.calls(), 2, "899s after refresh is still fresh");
}

#[tokio::test]
async fn refreshes_once_interval_elapsed() {
    let (cache, fetcher, clock) = two_source_cache();
    cache.get_entries().await;

    clock.advance(chrono::Duration::seconds(900));
    cache.get_entries().await;
    assert_eq!(fetcher.calls(), 4);

    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.last_refreshed_at, Some(clock_now(&clock)));
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
    use homepage_core::Clock;
    clock.now()
}

#[tokio::test]
async fn failed_refresh_keeps_entries_and_timestamp() {
    let (cache, fetcher, clock) = two_source_cache();
    let good = cache.get_entries().await;
    let before = cache.snapshot().await;

    fetcher.fail_all();
    clock.advance(chrono::Duration::seconds(901));

    let served = cache.get_entries().await;
    assert_eq!(served, good);
    assert_eq!(fetcher.calls(), 4);

    let after = cache.snapshot().await;
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.last_refreshed_at, before.last_refreshed_at);
    assert_eq!(after.version, before.version);

    let report = cache.last_report().await.unwrap();
    assert!(!report.installed);
    assert_eq!(report.failed(), 2);

    // Still stale, so the next read tries again.
    cache.get_entries().await;
    assert_eq!(fetcher.calls(), 6);
}

#[tokio::test]
async fn cold_start_failure_returns_empty_and_retries_next_read() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let cache = FeedCache::new(
        feed_config(vec![source("Alpha"), source("Beta")]),
        arc(&fetcher),
        Arc::new(start_clock()),
    );

    assert!(cache.get_entries().await.is_empty());
    assert_eq!(cache.snapshot().await.last_refreshed_at, None);

    assert!(cache.get_entries().await.is_empty());
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn entries_are_newest_first_and_ties_keep_source_order() {
    let alpha = source("Alpha");
    let beta = source("Beta");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.reply(&alpha.url, Reply::Feed(rss(&[("Alpha Old", JAN_1), ("Alpha Tie", JAN_3)])));
    fetcher.reply(&beta.url, Reply::Feed(rss(&[("Beta Tie", JAN_3), ("Beta Mid", JAN_2)])));
    let cache = FeedCache::new(
        feed_config(vec![alpha, beta]),
        arc(&fetcher),
        Arc::new(start_clock()),
    );

    let entries = cache.refresh().await;

    assert_eq!(titles(&entries), vec!["Alpha Tie", "Beta Tie", "Beta Mid", "Alpha Old"]);
    assert!(entries.windows(2).all(|w| w[0].sort_key >= w[1].sort_key));
    assert_eq!(entries[0].published_date, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
    assert_eq!(entries[0].summary, "About Alpha Tie");
    assert_eq!(entries[0].icon, "A");
    assert_eq!(entries[1].source, "Beta");
}

#[tokio::test]
async fn only_first_five_items_per_source() {
    let alpha = source("Alpha");
    let fetcher = Arc::new(ScriptedFetcher::new());
    let names: Vec<String> = (1..=8).map(|i| format!("Item {i}")).collect();
    let items: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), JAN_1)).collect();
    fetcher.reply(&alpha.url, Reply::Feed(rss(&items)));
    let cache = FeedCache::new(feed_config(vec![alpha]), arc(&fetcher), Arc::new(start_clock()));

    let entries = cache.get_entries().await;

    assert_eq!(titles(&entries), vec!["Item 1", "Item 2", "Item 3", "Item 4", "Item 5"]);
}

#[tokio::test]
async fn undated_items_use_fetch_time() {
    let alpha = source("Alpha");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.reply(
        &alpha.url,
        Reply::Feed(
            r#"<rss version="2.0"><channel><title>T</title><item><title>No Date</title><link>https://e/1</link></item></channel></rss>"#
                .to_owned(),
        ),
    );
    let clock = start_clock();
    let cache = FeedCache::new(feed_config(vec![alpha]), arc(&fetcher), Arc::new(clock.clone()));

    let entries = cache.get_entries().await;

    assert_eq!(entries[0].published_date, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    assert_eq!(entries[0].sort_key, clock_now(&clock).timestamp());
    assert_eq!(entries[0].summary, homepage_core::summary::EMPTY_SUMMARY_PLACEHOLDER);
}

#[tokio::test]
async fn version_bump_forces_refresh_of_recent_snapshot() {
    let (cache, fetcher, clock) = two_source_cache();
    let old_entry = FeedEntry {
        title: "From an older release".into(),
        link: "https://old.example.com".into(),
        source: "Alpha".into(),
        icon: "A".into(),
        published_date: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
        summary: "old".into(),
        sort_key: 0,
    };
    cache
        .install_snapshot(CacheSnapshot {
            version: CACHE_VERSION - 1,
            last_refreshed_at: Some(clock_now(&clock)),
            entries: vec![old_entry],
        })
        .await;

    let entries = cache.get_entries().await;

    assert_eq!(fetcher.calls(), 2);
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.title != "From an older release"));
    assert_eq!(cache.snapshot().await.version, CACHE_VERSION);
}

#[tokio::test]
async fn installed_current_version_snapshot_is_served() {
    let (cache, fetcher, clock) = two_source_cache();
    let warm = cache.refresh().await;
    let fresh = FeedCache::new(
        cache.config().clone(),
        arc(&fetcher),
        Arc::new(clock.clone()),
    );
    fresh.install_snapshot((*cache.snapshot().await).clone()).await;

    assert_eq!(fresh.get_entries().await, warm);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn timed_out_source_is_skipped() {
    let alpha = source("Alpha");
    let beta = source("Beta");
    let gamma = source("Gamma");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.reply(&alpha.url, Reply::Feed(rss(&[("Alpha One", JAN_1)])));
    fetcher.reply(&beta.url, Reply::Feed(rss(&[("Beta Two", JAN_2)])));
    fetcher.reply(&gamma.url, Reply::Hang);
    let cache = FeedCache::new(
        feed_config(vec![alpha, beta, gamma]),
        arc(&fetcher),
        Arc::new(start_clock()),
    );

    let entries = cache.get_entries().await;

    assert_eq!(titles(&entries), vec!["Beta Two", "Alpha One"]);
    let report = cache.last_report().await.unwrap();
    assert!(report.installed);
    assert_eq!(report.succeeded(), 2);
    match &report.sources[2].outcome {
        SourceOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_reads_share_one_refresh() {
    let alpha = source("Alpha");
    let beta = source("Beta");
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(100)));
    fetcher.reply(&alpha.url, Reply::Feed(rss(&[("Alpha One", JAN_1)])));
    fetcher.reply(&beta.url, Reply::Feed(rss(&[("Beta Two", JAN_2)])));
    let cache = FeedCache::new(
        feed_config(vec![alpha, beta]),
        arc(&fetcher),
        Arc::new(start_clock()),
    );

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_entries().await })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.await.unwrap().len(), 2);
    }
    assert_eq!(fetcher.calls(), 2);
}
