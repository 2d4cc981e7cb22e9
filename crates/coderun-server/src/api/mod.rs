// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.
//!
//! Routes live under `/react` and require a bearer token; `/health` is open.
//! Every response body is a JSON object with a `message` field.

mod projects;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, extract::State};
use coderun_runner::{ErrorKind, ProjectRunner};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::{self, IdentityResolver};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Project runner.
    pub runner: Arc<ProjectRunner>,
    /// Bearer token resolver.
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// Bundle the runner and identity resolver.
    pub fn new(runner: Arc<ProjectRunner>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self { runner, identity }
    }
}

/// Build the full router.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let react = projects::routes()
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_caller,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .with_state(state)
        .merge(react)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// CORS policy for the editor front end.
pub fn cors_layer(origin: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            HeaderValue::from_str(origin)
                .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5000")),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(600))
}

async fn health(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Error response with a `message` and optional `diagnostics`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    diagnostics: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<&'a str>,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            diagnostics: None,
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<coderun_runner::Error> for ApiError {
    fn from(err: coderun_runner::Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Io | ErrorKind::DependencyOperationFailed | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match kind {
            ErrorKind::Internal => {
                error!(error = %err, "Request failed");
                "Internal server error".to_string()
            }
            ErrorKind::Io => {
                error!(error = %err, "Request failed");
                err.to_string()
            }
            _ => err.to_string(),
        };

        Self {
            status,
            message,
            diagnostics: err.diagnostics().map(str::to_string),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: &self.message,
            diagnostics: self.diagnostics.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}
