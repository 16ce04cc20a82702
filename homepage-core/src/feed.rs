use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::summary::{self, MISSING_LINK_PLACEHOLDER, UNTITLED_PLACEHOLDER};

/// A configured upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub icon: String,
    /// Replacement text for sources whose summaries carry no information
    /// (a bare "Comments" link and the like). `None` keeps summaries as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_info_summary: Option<String>,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            icon: icon.into(),
            low_info_summary: None,
        }
    }

    pub fn with_low_info_summary(mut self, placeholder: impl Into<String>) -> Self {
        self.low_info_summary = Some(placeholder.into());
        self
    }
}

/// One aggregated item as served to the reading view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub source: String,
    pub icon: String,
    pub published_date: NaiveDate,
    pub summary: String,
    /// Epoch seconds of the publish time; ordering only.
    pub sort_key: i64,
}

impl FeedEntry {
    /// Normalises a wire item from `source`. Items without a publish time
    /// are stamped with `fetched_at`.
    pub fn from_raw(
        source: &FeedSource,
        raw: &RawEntry,
        fetched_at: DateTime<Utc>,
        summary_max_chars: usize,
    ) -> Self {
        let published = raw.published.unwrap_or(fetched_at);
        Self {
            title: summary::non_blank_or(raw.title.as_deref(), UNTITLED_PLACEHOLDER),
            link: summary::non_blank_or(raw.link.as_deref(), MISSING_LINK_PLACEHOLDER),
            source: source.name.clone(),
            icon: source.icon.clone(),
            published_date: published.date_naive(),
            summary: summary::summarize(
                raw.summary.as_deref(),
                summary_max_chars,
                source.low_info_summary.as_deref(),
            ),
            sort_key: published.timestamp(),
        }
    }
}

/// An item as read from the wire, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

impl RawEntry {
    pub fn from_rss_item(item: &rss::Item) -> Self {
        let published = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
            .or_else(|| {
                item.dublin_core_ext()
                    .and_then(|dc| dc.dates().first())
                    .and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
            })
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            title: item.title().map(ToOwned::to_owned),
            link: item.link().map(ToOwned::to_owned),
            published,
            summary: item
                .description()
                .or_else(|| item.content())
                .map(ToOwned::to_owned),
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().to_owned());

        let published = entry
            .published()
            .copied()
            .unwrap_or_else(|| *entry.updated())
            .with_timezone(&Utc);

        let summary = entry
            .summary()
            .map(|text| text.as_str().to_owned())
            .or_else(|| {
                entry
                    .content()
                    .and_then(|content| content.value())
                    .map(ToOwned::to_owned)
            });

        Self {
            title: Some(entry.title().as_str().to_owned()),
            link,
            published: Some(published),
            summary,
        }
    }
}

/// Reads an RSS 2.0 payload, falling back to Atom.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<RawEntry>, FetchError> {
    let rss_err = match rss::Channel::read_from(bytes) {
        Ok(channel) => return Ok(channel.items().iter().map(RawEntry::from_rss_item).collect()),
        Err(err) => err,
    };

    match atom_syndication::Feed::read_from(bytes) {
        Ok(feed) => Ok(feed.entries().iter().map(RawEntry::from_atom_entry).collect()),
        Err(atom_err) => Err(FetchError::Parse(format!(
            "not rss ({rss_err}) nor atom ({atom_err})"
        ))),
    }
}
