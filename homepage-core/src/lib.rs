pub mod cache;
pub mod clock;
pub mod comments;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod rate_limit;
pub mod refresher;
pub mod summary;

pub use cache::{CacheSnapshot, FeedCache, RefreshReport, SourceOutcome, SourceReport};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use comments::{Comment, CommentService, CommentStore, InMemoryCommentStore, NewComment};
pub use config::{AppConfig, FeedConfig, RateLimitConfig, ServerConfig, CACHE_VERSION};
pub use error::{CommentError, ConfigError, FetchError, RefresherError, RATE_LIMITED_MESSAGE};
pub use feed::{parse_feed, FeedEntry, FeedSource, RawEntry};
pub use fetch::{FeedFetcher, HttpFetcher};
pub use rate_limit::{spawn_sweeper, RateLimiter, SweeperHandle};
pub use refresher::{spawn_refresher, BackgroundHandle, RefresherHandle};
