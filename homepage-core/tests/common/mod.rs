#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use homepage_core::{FeedConfig, FeedFetcher, FeedSource, FetchError};

#[derive(Debug, Clone)]
pub enum Reply {
    Feed(String),
    Fail,
    Hang,
}

/// Serves canned replies per source url and counts calls.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn reply(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_owned(), reply);
    }

    pub fn fail_all(&self) {
        let mut replies = self.replies.lock().unwrap();
        for reply in replies.values_mut() {
            *reply = Reply::Fail;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.replies.lock().unwrap().get(&source.url).cloned();
        match reply {
            Some(Reply::Feed(body)) => Ok(Bytes::from(body)),
            Some(Reply::Fail) | None => Err(FetchError::Status(503)),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Status(504))
            }
        }
    }
}

pub fn source(name: &str) -> FeedSource {
    FeedSource::new(name, format!("https://{}.example.com/rss", name.to_lowercase()), &name[..1])
}

pub fn feed_config(sources: Vec<FeedSource>) -> FeedConfig {
    FeedConfig {
        sources,
        ..FeedConfig::default()
    }
}

/// RSS body with `(title, pubDate)` items in document order.
pub fn rss(items: &[(&str, &str)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>T</title>"#,
    );
    for (title, pub_date) in items {
        let slug = title.to_lowercase().replace(' ', "-");
        body.push_str(&format!(
            "<item><title>{title}</title><link>https://example.com/{slug}</link><pubDate>{pub_date}</pubDate><description>&lt;p&gt;About {title}&lt;/p&gt;</description></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

pub fn arc(fetcher: &Arc<ScriptedFetcher>) -> Arc<dyn FeedFetcher> {
    fetcher.clone()
}
