//! API request/response models for session refresh and session management.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    credentials::TokenPair,
    db::models::sessions::Session,
    types::SessionId,
};

/// Body plus a `Set-Cookie` header carrying (or clearing) the session cookie.
pub struct WithSessionCookie<T> {
    pub body: T,
    pub cookie: String,
}

impl<T: Serialize> IntoResponse for WithSessionCookie<T> {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Json(self.body)).into_response();
        match HeaderValue::from_str(&self.cookie) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Session cookie is not a valid header value: {e}"),
        }
        response
    }
}

/// `name=value` cookie for the access token, living as long as the token.
pub fn session_cookie(name: &str, access_token: &str, max_age_secs: u64) -> String {
    format!("{name}={access_token}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={max_age_secs}")
}

/// An expired cookie that makes the browser drop the session.
pub fn cleared_session_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type.to_string(),
            expires_in: pair.expires_in,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    #[schema(value_type = String, format = "uuid")]
    pub id: SessionId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    /// The session the request was made with
    pub is_current: bool,
}

impl SessionInfo {
    pub fn new(session: Session, current_access_hash: &str) -> Self {
        Self {
            is_current: session.access_token_hash == current_access_hash,
            id: session.id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            expires_at: session.expires_at,
            is_revoked: session.is_revoked,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListSessionsQuery {
    #[param(default = false)]
    pub include_expired: Option<bool>,
}
