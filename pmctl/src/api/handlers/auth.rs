//! Session refresh, logout and session management.
//!
//! Sessions are created by the login flow in front of this service; these endpoints only keep
//! them alive and let their owner end them.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        rbac::MessageResponse,
        sessions::{
            ListSessionsQuery, RefreshRequest, SessionInfo, SessionsResponse, TokenPairResponse, WithSessionCookie,
            cleared_session_cookie, session_cookie,
        },
    },
    auth::current_user::{AuthMethod, CurrentUser},
    errors::{Error, Result},
    types::SessionId,
};

/// Client address as reported by the proxy in front of us, if any.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// Exchange a refresh token for a new access/refresh pair.
///
/// The presented refresh token is spent: its session is revoked and a replay is rejected.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    summary = "Refresh session",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair; the session cookie is set to the new access token", body = TokenPairResponse),
        (status = 401, description = "Invalid or expired credentials"),
    )
)]
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(data): Json<RefreshRequest>,
) -> Result<WithSessionCookie<TokenPairResponse>> {
    let pair = state
        .sessions
        .refresh_session(&data.refresh_token, client_ip(&headers), user_agent(&headers))
        .await?;

    let cookie = session_cookie(&state.config.auth.session_cookie_name, &pair.access_token, pair.expires_in);
    Ok(WithSessionCookie {
        body: pair.into(),
        cookie,
    })
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    summary = "Log out",
    description = "Revoke the session the request was made with and clear the session cookie",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("SessionCookie" = []))
)]
pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> Result<WithSessionCookie<MessageResponse>> {
    if user.auth_method == AuthMethod::Session {
        state.sessions.revoke_by_access_hash(user.id, &user.token_hash).await?;
    }

    Ok(WithSessionCookie {
        body: MessageResponse::new("Logged out"),
        cookie: cleared_session_cookie(&state.config.auth.session_cookie_name),
    })
}

#[utoipa::path(
    get,
    path = "/auth/sessions",
    tag = "auth",
    summary = "List sessions",
    params(ListSessionsQuery),
    responses(
        (status = 200, description = "The caller's sessions", body = SessionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []), ("SessionCookie" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
    user: CurrentUser,
) -> Result<Json<SessionsResponse>> {
    let sessions = state
        .sessions
        .list_sessions(user.id, query.include_expired.unwrap_or(false))
        .await?;
    Ok(Json(SessionsResponse {
        sessions: sessions
            .into_iter()
            .map(|s| SessionInfo::new(s, &user.token_hash))
            .collect(),
    }))
}

#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    tag = "auth",
    summary = "Revoke session",
    params(("session_id" = uuid::Uuid, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "Session not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []), ("SessionCookie" = []))
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    user: CurrentUser,
) -> Result<StatusCode> {
    if !state.sessions.revoke_session(session_id, user.id).await? {
        return Err(Error::NotFoundMessage {
            message: "Session not found".to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/auth/sessions/revoke-others",
    tag = "auth",
    summary = "Revoke other sessions",
    description = "Revoke every session of the caller except the one the request was made with",
    responses(
        (status = 200, description = "Sessions revoked", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []), ("SessionCookie" = []))
)]
pub async fn revoke_other_sessions(State(state): State<AppState>, user: CurrentUser) -> Result<Json<MessageResponse>> {
    let count = state.sessions.revoke_other_sessions(user.id, &user.token_hash).await?;
    Ok(Json(MessageResponse::new(format!("Revoked {count} session(s)"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use serde_json::json;

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test_log::test(tokio::test)]
    async fn test_refresh_rotates_pair() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let pair = state.sessions.create_session(user.id, None, None).await.unwrap();
        let app = create_test_app(state);

        let response = app
            .post("/api/v1/auth/refresh")
            .add_header(header::USER_AGENT, "pmctl-tests")
            .json(&json!({ "refresh_token": pair.refresh_token }))
            .await;
        response.assert_status_ok();
        let cookie = response.header(header::SET_COOKIE);
        let next: TokenPairResponse = response.json();
        assert_eq!(next.token_type, "bearer");
        assert!(cookie.to_str().unwrap().starts_with(&format!("pmctl_session={}", next.access_token)));

        // The old pair is dead
        app.get("/api/v1/auth/sessions")
            .authorization_bearer(&pair.access_token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        let response = app
            .post("/api/v1/auth/refresh")
            .json(&json!({ "refresh_token": pair.refresh_token }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        response.assert_json(&json!({ "detail": "Invalid or expired credentials" }));

        let sessions: SessionsResponse = app
            .get("/api/v1/auth/sessions")
            .authorization_bearer(&next.access_token)
            .await
            .json();
        assert_eq!(sessions.sessions.len(), 1);
        assert!(sessions.sessions[0].is_current);
        assert_eq!(sessions.sessions[0].user_agent.as_deref(), Some("pmctl-tests"));
    }

    #[test_log::test(tokio::test)]
    async fn test_refresh_rejects_access_token() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let pair = state.sessions.create_session(user.id, None, None).await.unwrap();
        let app = create_test_app(state);

        app.post("/api/v1/auth/refresh")
            .json(&json!({ "refresh_token": pair.access_token }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_logout_revokes_session_and_clears_cookie() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let pair = state.sessions.create_session(user.id, None, None).await.unwrap();
        let app = create_test_app(state);
        let cookie = format!("pmctl_session={}", pair.access_token);

        let response = app.post("/api/v1/auth/logout").add_header(header::COOKIE, &cookie).await;
        response.assert_status_ok();
        assert!(response.header(header::SET_COOKIE).to_str().unwrap().contains("Max-Age=0"));

        app.get("/api/v1/auth/sessions")
            .add_header(header::COOKIE, &cookie)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_revoke_sessions() {
        let state = create_test_state().await;
        let alice = create_test_user(&state, "alice@example.com").await;
        let bob = create_test_user(&state, "bob@example.com").await;
        let current = state.sessions.create_session(alice.id, None, None).await.unwrap();
        let laptop = state.sessions.create_session(alice.id, None, None).await.unwrap();
        let phone = state.sessions.create_session(alice.id, None, None).await.unwrap();
        let bobs = state.sessions.create_session(bob.id, None, None).await.unwrap();
        let app = create_test_app(state);

        // Another user's session reads as missing
        let response = app
            .delete(&format!("/api/v1/auth/sessions/{}", bobs.session_id))
            .authorization_bearer(&current.access_token)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": "Session not found" }));

        app.delete(&format!("/api/v1/auth/sessions/{}", laptop.session_id))
            .authorization_bearer(&current.access_token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.get("/api/v1/auth/sessions")
            .authorization_bearer(&laptop.access_token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let response = app
            .post("/api/v1/auth/sessions/revoke-others")
            .authorization_bearer(&current.access_token)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Revoked 1 session(s)");

        app.get("/api/v1/auth/sessions")
            .authorization_bearer(&phone.access_token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        app.get("/api/v1/auth/sessions")
            .authorization_bearer(&current.access_token)
            .await
            .assert_status_ok();
        app.get("/api/v1/auth/sessions")
            .authorization_bearer(&bobs.access_token)
            .await
            .assert_status_ok();
    }
}
