use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use homepage_core::{
    spawn_refresher, spawn_sweeper, AppConfig, CommentService, FeedCache, HttpFetcher,
    InMemoryCommentStore, RateLimiter, SharedClock, SystemClock,
};
use homepage_server::{router, AppState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = AppConfig::load();
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    if let Err(err) = run(config).await {
        error!(error = %err, "server stopped with an error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run(config: AppConfig) -> std::io::Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let fetcher = HttpFetcher::new(&config.feeds.user_agent, config.feeds.request_timeout())
        .expect("failed to build HTTP client");

    let feeds = FeedCache::new(config.feeds.clone(), Arc::new(fetcher), clock.clone());
    let limiter = RateLimiter::new(&config.rate_limit, clock.clone());
    let comments = CommentService::new(
        limiter.clone(),
        Arc::new(InMemoryCommentStore::new()),
        clock,
    );

    let refresher = config
        .feeds
        .background_refresh
        .then(|| spawn_refresher(feeds.clone(), config.feeds.refresh_interval()));
    let sweeper = spawn_sweeper(
        limiter,
        Duration::from_secs(config.rate_limit.window_seconds),
    );

    let state = AppState {
        feeds,
        comments,
        background_refresh: config.feeds.background_refresh,
        trust_forwarded_for: config.server.trust_forwarded_for,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, sources = config.feeds.sources.len(), "homepage server listening");

    let served = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(handle) = refresher {
        if let Err(err) = handle.stop().await {
            warn!(error = %err, "feed refresher did not stop cleanly");
        }
    }
    if let Err(err) = sweeper.stop().await {
        warn!(error = %err, "rate limiter sweeper did not stop cleanly");
    }

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
