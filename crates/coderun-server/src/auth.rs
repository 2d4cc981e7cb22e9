// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller identity.
//!
//! Every `/react` route requires `Authorization: Bearer <token>`. The token is
//! resolved to a [`CallerId`] by an [`IdentityResolver`]; the shipped resolver
//! verifies HS256 JWTs carrying a `userId` claim.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::api::{ApiError, AppState};

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl CallerId {
    /// The caller's user id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity resolution errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No bearer token on the request.
    #[error("No token provided")]
    MissingToken,
    /// Token failed verification.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Turns a bearer token into a caller identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token` or fail.
    async fn resolve(&self, token: &str) -> Result<CallerId, AuthError>;
}

/// Token claims.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id of the caller.
    pub user_id: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// HS256 JWT resolver.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    /// Resolver verifying tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, token: &str) -> Result<CallerId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::InvalidToken("empty userId claim".to_string()));
        }
        Ok(CallerId(data.claims.user_id))
    }
}

/// Sign a token for `user_id` valid for `ttl`.
pub fn issue_token(secret: &str, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
    let exp = chrono::Utc::now().timestamp().max(0) as u64 + ttl.as_secs();
    let claims = Claims {
        user_id: user_id.to_string(),
        exp,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware that resolves the caller or answers 401.
pub async fn require_caller(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::unauthorized(AuthError::MissingToken.to_string()).into_response();
    };

    match state.identity.resolve(token).await {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "Rejected bearer token");
            ApiError::unauthorized("Invalid token").into_response()
        }
    }
}
