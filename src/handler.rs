//! HTTP request handlers for the user search.

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::CursorPool;
use crate::engine::Executor;
use crate::error::CursorError;
use crate::filter::{IdMatch, user_search};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query string of `GET /users`
#[derive(Debug, Default, Deserialize)]
pub struct NewSearchRequest {
    pub id_match: Option<String>,
    #[serde(default)]
    pub page_size: usize,
}

/// Query string of `GET /users/{cursor}`
#[derive(Debug, Default, Deserialize)]
pub struct NextPageRequest {
    #[serde(default)]
    pub page_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub cursor_id: String,
    pub done: bool,
    pub users: Vec<User>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cursors: usize,
}

/// Structured error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "NOT_FOUND", "BAD_REQUEST", "INTERNAL_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: msg.into(),
            request_id: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: "NOT_FOUND".to_string(),
            message: msg.into(),
            request_id: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            code: "UNAVAILABLE".to_string(),
            message: "Server is shutting down.".to_string(),
            request_id: None,
        }
    }

    pub fn internal() -> Self {
        Self {
            code: "INTERNAL_ERROR".to_string(),
            message: "An internal error occurred.".to_string(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&CursorError> for ApiError {
    fn from(err: &CursorError) -> Self {
        match err.status_code() {
            400 => Self::bad_request(err.to_string()),
            404 => Self::not_found(err.to_string()),
            503 => Self::unavailable(),
            // database details stay in the logs
            _ => Self::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

fn query_params<T>(
    query: Result<Query<T>, QueryRejection>,
    req_id: &str,
) -> Result<T, ApiError> {
    query.map(|Query(req)| req).map_err(|rejection| {
        tracing::warn!("[{}] Rejected query string: {}", req_id, rejection.body_text());
        ApiError::bad_request(rejection.body_text()).with_request_id(req_id)
    })
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

pub async fn health_check<E: Executor>(State(pool): State<CursorPool<E>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cursors: pool.len(),
    })
}

/// `GET /users?id_match=>100&page_size=50`
///
/// Declares a cursor keyed by the request id and returns the first page.
pub async fn new_user_search<E: Executor>(
    State(pool): State<CursorPool<E>>,
    headers: HeaderMap,
    query: Result<Query<NewSearchRequest>, QueryRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let req_id = request_id(&headers);
    let req = query_params(query, &req_id)?;

    let filter = match req.id_match.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match raw.parse::<IdMatch>() {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!("[{}] Rejected id_match {:?}: {}", req_id, raw, e);
                return Err(ApiError::bad_request(e.to_string()).with_request_id(req_id));
            }
        },
        _ => None,
    };

    let (sql, params) = user_search(filter.as_ref());

    let cursor_id = match pool.declare(&req_id, &sql, &params).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("[{}] Failed to declare cursor: {}", req_id, e);
            return Err(ApiError::from(&e).with_request_id(req_id));
        }
    };

    let mut users = Vec::new();
    let more = match pool.fetch(&mut users, &cursor_id, req.page_size).await {
        Ok(more) => more,
        Err(e) => {
            tracing::error!("[{}] Failed to fetch: {}", req_id, e);
            return Err(ApiError::from(&e).with_request_id(req_id));
        }
    };

    Ok(Json(UserResponse {
        cursor_id,
        done: !more,
        users,
    }))
}

/// `GET /users/{cursor}?page_size=50`
pub async fn next_user_page<E: Executor>(
    State(pool): State<CursorPool<E>>,
    Path(cursor): Path<String>,
    headers: HeaderMap,
    query: Result<Query<NextPageRequest>, QueryRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let req_id = request_id(&headers);
    let req = query_params(query, &req_id)?;

    let mut users = Vec::new();
    let more = match pool.fetch(&mut users, &cursor, req.page_size).await {
        Ok(more) => more,
        Err(e) => {
            if matches!(e, CursorError::SessionNotFound(_) | CursorError::InvalidIdentifier(_)) {
                tracing::warn!("[{}] Cursor {:?}: {}", req_id, cursor, e);
            } else {
                tracing::error!("[{}] Failed to fetch from cursor {:?}: {}", req_id, cursor, e);
            }
            return Err(ApiError::from(&e).with_request_id(req_id));
        }
    };

    Ok(Json(UserResponse {
        cursor_id: crate::cursor::sanitize_id(&cursor),
        done: !more,
        users,
    }))
}
