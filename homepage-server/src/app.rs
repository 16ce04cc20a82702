use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use homepage_core::{
    Comment, CommentError, CommentService, FeedCache, FeedEntry, NewComment,
    RATE_LIMITED_MESSAGE,
};
use serde::Serialize;
use tracing::error;

#[derive(Clone, Debug)]
pub struct AppState {
    pub feeds: FeedCache,
    pub comments: CommentService,
    /// Serve the reading view straight from the snapshot; a background task
    /// keeps it fresh.
    pub background_refresh: bool,
    pub trust_forwarded_for: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/reading/", get(reading))
        .route(
            "/api/comments/{slug}",
            get(list_comments).post(submit_comment),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ReadingView {
    pub entries: Vec<FeedEntry>,
}

async fn reading(State(state): State<AppState>) -> Json<ReadingView> {
    let entries = if state.background_refresh {
        state.feeds.cached_entries().await
    } else {
        state.feeds.get_entries().await
    };
    Json(ReadingView { entries })
}

async fn list_comments(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    Ok(Json(state.comments.list(&slug).await?))
}

async fn submit_comment(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(slug): Path<String>,
    Json(body): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let stored = state.comments.submit(&identity.0, &slug, body).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Who is writing: the peer address, or the first `X-Forwarded-For` hop
/// when the server sits behind a trusted proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(ip) = forwarded {
                return Ok(Self(ip.to_owned()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(peer.unwrap_or_else(|| "unknown".to_owned())))
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(CommentError);

impl From<CommentError> for ApiError {
    fn from(err: CommentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            CommentError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                RATE_LIMITED_MESSAGE.to_owned(),
            ),
            CommentError::Invalid(reason) => {
                (StatusCode::BAD_REQUEST, "invalid_input", (*reason).to_owned())
            }
            CommentError::Store(reason) => {
                error!(error = %reason, "comment store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "Comment could not be saved".to_owned(),
                )
            }
        };

        let mut response = (
            status,
            Json(ApiErrorBody {
                error: ApiErrorMessage { code, message },
            }),
        )
            .into_response();

        if let CommentError::RateLimited { retry_after_secs } = self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
