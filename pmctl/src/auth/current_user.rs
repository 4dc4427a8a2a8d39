//! Request extractors for the authenticated caller.
//!
//! A credential is looked for in three places, in order: `Authorization: Bearer <token>`, the
//! configured API token header, then the session cookie. The first one present is the one used;
//! a request carrying an invalid bearer token is rejected even if it also has a valid cookie.
//!
//! A value with the `pc_` prefix is a console API token; anything else is a signed access token,
//! which only authenticates while its session is live.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};
use utoipa::ToSchema;

use crate::{
    AppState, crypto,
    db::models::{environments::EnvironmentDBResponse, users::UserDBResponse},
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    ApiToken,
}

/// The authenticated, active caller.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub is_global_admin: bool,
    pub auth_method: AuthMethod,
    /// SHA-256 of the presented credential; identifies the caller's own session
    #[serde(skip)]
    pub token_hash: String,
}

impl CurrentUser {
    fn new(user: UserDBResponse, auth_method: AuthMethod, token_hash: String) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            is_active: user.is_active,
            is_global_admin: user.is_global_admin,
            auth_method,
            token_hash,
        }
    }
}

/// An authenticated caller who is a global admin or holds the `superuser` role somewhere.
#[derive(Debug, Clone)]
pub struct CurrentSuperuser(pub CurrentUser);

/// The currently active environment.
#[derive(Debug, Clone)]
pub struct ActiveEnvironment(pub EnvironmentDBResponse);

/// Pull the raw credential out of the request, if any.
fn presented_credential(parts: &Parts, state: &AppState) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    if let Some(token) = parts
        .headers
        .get(state.config.auth.api_token_header.as_str())
        .and_then(|h| h.to_str().ok())
    {
        return Some(token.trim().to_string());
    }

    let cookie_name = &state.config.auth.session_cookie_name;
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| name == cookie_name)
        .map(|(_, value)| value.to_string())
}

/// Resolve the caller.
///
/// Returns:
/// - `Ok(None)`: no credential present
/// - `Ok(Some(user))`: credential valid and the user active
/// - `Err(Unauthenticated)`: a credential was present but rejected
#[instrument(skip_all)]
pub async fn authenticate(parts: &Parts, state: &AppState) -> Result<Option<CurrentUser>> {
    let Some(token) = presented_credential(parts, state).filter(|t| !t.is_empty()) else {
        trace!("No credential on request");
        return Ok(None);
    };
    let token_hash = crypto::hash_value(&token);

    let resolved = if crypto::is_api_token(&token) {
        state
            .api_tokens
            .validate_token(&token)
            .await?
            .map(|(user, _)| CurrentUser::new(user, AuthMethod::ApiToken, token_hash))
    } else {
        state
            .sessions
            .validate_access_token(&token)
            .await?
            .map(|(user, _)| CurrentUser::new(user, AuthMethod::Session, token_hash))
    };

    match resolved {
        Some(user) => {
            debug!(user_id = %abbrev_uuid(&user.id), method = ?user.auth_method, "Authenticated request");
            Ok(Some(user))
        }
        None => {
            warn!(path = %parts.uri.path(), "Rejected credential");
            Err(Error::Unauthenticated {
                message: Some("Invalid or expired credentials".to_string()),
            })
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Already resolved by the RBAC layer
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let user = authenticate(parts, state).await?.ok_or(Error::Unauthenticated { message: None })?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

impl FromRequestParts<AppState> for CurrentSuperuser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if state.rbac.is_superuser(user.id, user.is_global_admin).await? {
            Ok(CurrentSuperuser(user))
        } else {
            Err(Error::InsufficientPermissions {
                required: "superuser".to_string(),
                resource: parts.uri.path().to_string(),
            })
        }
    }
}

impl FromRequestParts<AppState> for ActiveEnvironment {
    type Rejection = Error;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self> {
        state
            .store
            .get_active_environment()
            .await?
            .map(ActiveEnvironment)
            .ok_or_else(|| Error::BadRequest {
                message: "No active environment configured".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::users::UserCreateDBRequest,
        test_utils::{create_bare_state, create_test_state, create_test_user},
    };
    use axum::http::{Request, StatusCode};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("http://localhost/api/v1/tokens");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test_log::test(tokio::test)]
    async fn test_no_credential_is_unauthenticated() {
        let state = create_test_state().await;
        let err = CurrentUser::from_request_parts(&mut parts(&[]), &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.user_message(), "Not authenticated");
    }

    #[test_log::test(tokio::test)]
    async fn test_each_credential_source() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let (api_token, _) = state.api_tokens.create_token(user.id, "ci", None, None).await.unwrap();
        let pair = state.sessions.create_session(user.id, None, None).await.unwrap();

        let bearer = format!("Bearer {api_token}");
        let resolved = CurrentUser::from_request_parts(&mut parts(&[("authorization", &bearer)]), &state)
            .await
            .unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.auth_method, AuthMethod::ApiToken);

        let resolved = CurrentUser::from_request_parts(&mut parts(&[("x-api-token", &api_token)]), &state)
            .await
            .unwrap();
        assert_eq!(resolved.auth_method, AuthMethod::ApiToken);

        let cookie = format!("theme=dark; pmctl_session={}", pair.access_token);
        let resolved = CurrentUser::from_request_parts(&mut parts(&[("cookie", &cookie)]), &state)
            .await
            .unwrap();
        assert_eq!(resolved.auth_method, AuthMethod::Session);
        assert_eq!(resolved.token_hash, crypto::hash_value(&pair.access_token));
    }

    #[test_log::test(tokio::test)]
    async fn test_bearer_takes_precedence() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let pair = state.sessions.create_session(user.id, None, None).await.unwrap();

        // A bad bearer token is not rescued by a good cookie
        let cookie = format!("pmctl_session={}", pair.access_token);
        let err = CurrentUser::from_request_parts(
            &mut parts(&[("authorization", "Bearer pc_not-a-real-token"), ("cookie", &cookie)]),
            &state,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.user_message(), "Invalid or expired credentials");
    }

    #[test_log::test(tokio::test)]
    async fn test_inactive_user_rejected() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let (api_token, _) = state.api_tokens.create_token(user.id, "ci", None, None).await.unwrap();
        state.store.set_user_active(user.id, false).await.unwrap();

        let bearer = format!("Bearer {api_token}");
        let err = CurrentUser::from_request_parts(&mut parts(&[("authorization", &bearer)]), &state)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_superuser_extractor() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let admin = state
            .store
            .create_user(&UserCreateDBRequest {
                email: "root@example.com".to_string(),
                display_name: None,
                is_global_admin: true,
            })
            .await
            .unwrap();

        let (user_token, _) = state.api_tokens.create_token(user.id, "t", None, None).await.unwrap();
        let (admin_token, _) = state.api_tokens.create_token(admin.id, "t", None, None).await.unwrap();

        let bearer = format!("Bearer {user_token}");
        let err = CurrentSuperuser::from_request_parts(&mut parts(&[("authorization", &bearer)]), &state)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let bearer = format!("Bearer {admin_token}");
        let CurrentSuperuser(resolved) = CurrentSuperuser::from_request_parts(&mut parts(&[("authorization", &bearer)]), &state)
            .await
            .unwrap();
        assert!(resolved.is_global_admin);
    }

    #[test_log::test(tokio::test)]
    async fn test_active_environment_extractor() {
        let state = create_test_state().await;
        let ActiveEnvironment(env) = ActiveEnvironment::from_request_parts(&mut parts(&[]), &state).await.unwrap();
        assert!(env.is_active);

        let state = create_bare_state();
        let err = ActiveEnvironment::from_request_parts(&mut parts(&[]), &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "No active environment configured");
    }
}
