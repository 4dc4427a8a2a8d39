//! Console API tokens and cluster token issuance.
//!
//! Every caller manages their own tokens. Tokens of other users are reported as not found rather
//! than forbidden, so token IDs cannot be enumerated. Superusers get a separate admin surface.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    AppState,
    api::models::{
        rbac::MessageResponse,
        tokens::{
            ClusterTokenCapabilityResponse, ClusterTokenRequest, ClusterTokenResponse, ClusterTokenSecretRequest,
            ListTokensQuery, SAVE_TOKEN_MESSAGE, TokenCreate, TokenCreatedResponse, TokenInfo, TokenStatsResponse,
            TokensResponse,
        },
    },
    auth::current_user::{ActiveEnvironment, CurrentSuperuser, CurrentUser},
    errors::{Error, Result},
    types::{ApiTokenId, UserId},
};

fn token_not_found() -> Error {
    Error::NotFoundMessage {
        message: "Token not found".to_string(),
    }
}

/// Create an API token for the current user.
///
/// This is the only response that ever contains the token value.
#[utoipa::path(
    post,
    path = "/tokens",
    tag = "tokens",
    summary = "Create API token",
    request_body = TokenCreate,
    responses(
        (status = 201, description = "Token created", body = TokenCreatedResponse),
        (status = 400, description = "Invalid name"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn create_token(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(data): Json<TokenCreate>,
) -> Result<(StatusCode, Json<TokenCreatedResponse>)> {
    let (token, row) = state
        .api_tokens
        .create_token(user.id, &data.name, data.expires_in_days, data.scopes)
        .await?;
    Ok((StatusCode::CREATED, Json(TokenCreatedResponse::new(token, row))))
}

#[utoipa::path(
    get,
    path = "/tokens",
    tag = "tokens",
    summary = "List API tokens",
    params(ListTokensQuery),
    responses(
        (status = 200, description = "The caller's tokens", body = TokensResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_tokens(
    State(state): State<AppState>,
    Query(query): Query<ListTokensQuery>,
    user: CurrentUser,
) -> Result<Json<TokensResponse>> {
    let tokens = state
        .api_tokens
        .list_tokens(user.id, query.include_revoked.unwrap_or(false))
        .await?;
    Ok(Json(tokens.into()))
}

#[utoipa::path(
    get,
    path = "/tokens/stats",
    tag = "tokens",
    summary = "API token statistics",
    responses(
        (status = 200, description = "Token counts", body = TokenStatsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn token_stats(State(state): State<AppState>, user: CurrentUser) -> Result<Json<TokenStatsResponse>> {
    Ok(Json(state.api_tokens.token_stats(user.id).await?.into()))
}

#[utoipa::path(
    get,
    path = "/tokens/{token_id}",
    tag = "tokens",
    summary = "Get API token",
    params(("token_id" = uuid::Uuid, Path, description = "Token ID")),
    responses(
        (status = 200, description = "Token metadata", body = TokenInfo),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Token not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn get_token(
    State(state): State<AppState>,
    Path(token_id): Path<ApiTokenId>,
    user: CurrentUser,
) -> Result<Json<TokenInfo>> {
    let token = state
        .api_tokens
        .get_token(token_id, user.id)
        .await?
        .ok_or_else(token_not_found)?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    post,
    path = "/tokens/{token_id}/revoke",
    tag = "tokens",
    summary = "Revoke API token",
    params(("token_id" = uuid::Uuid, Path, description = "Token ID")),
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 404, description = "Token not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<ApiTokenId>,
    user: CurrentUser,
) -> Result<Json<MessageResponse>> {
    if !state.api_tokens.revoke_token(token_id, user.id).await? {
        return Err(token_not_found());
    }
    Ok(Json(MessageResponse::new("Token revoked")))
}

#[utoipa::path(
    delete,
    path = "/tokens/{token_id}",
    tag = "tokens",
    summary = "Delete API token",
    params(("token_id" = uuid::Uuid, Path, description = "Token ID")),
    responses(
        (status = 204, description = "Token deleted"),
        (status = 404, description = "Token not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn delete_token(
    State(state): State<AppState>,
    Path(token_id): Path<ApiTokenId>,
    user: CurrentUser,
) -> Result<StatusCode> {
    if !state.api_tokens.delete_token(token_id, user.id).await? {
        return Err(token_not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/tokens/revoke-all",
    tag = "tokens",
    summary = "Revoke all of the caller's API tokens",
    responses(
        (status = 200, description = "Tokens revoked", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn revoke_all_tokens(State(state): State<AppState>, user: CurrentUser) -> Result<Json<MessageResponse>> {
    let count = state.api_tokens.revoke_all_for_user(user.id).await?;
    Ok(Json(MessageResponse::new(format!("Revoked {count} token(s)"))))
}

#[utoipa::path(
    get,
    path = "/tokens/pulsar/capability",
    tag = "tokens",
    summary = "Cluster token capability",
    description = "Whether the active environment has a signing key for cluster tokens",
    responses(
        (status = 200, description = "Capability", body = ClusterTokenCapabilityResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn cluster_token_capability(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ClusterTokenCapabilityResponse>> {
    let response = match state.store.get_active_environment().await? {
        Some(environment) => ClusterTokenCapabilityResponse {
            can_generate: environment.has_cluster_token_secret(),
            environment_id: Some(environment.id),
            environment_name: Some(environment.name),
        },
        None => ClusterTokenCapabilityResponse {
            can_generate: false,
            environment_id: None,
            environment_name: None,
        },
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/tokens/pulsar/generate",
    tag = "tokens",
    summary = "Generate cluster token",
    description = "Mint a token for the messaging cluster, signed with the active environment's key",
    request_body = ClusterTokenRequest,
    responses(
        (status = 200, description = "Token generated", body = ClusterTokenResponse),
        (status = 400, description = "No active environment, no signing key, or invalid input"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn generate_cluster_token(
    State(state): State<AppState>,
    _user: CurrentUser,
    ActiveEnvironment(environment): ActiveEnvironment,
    Json(data): Json<ClusterTokenRequest>,
) -> Result<Json<ClusterTokenResponse>> {
    let token = state
        .api_tokens
        .generate_cluster_token(environment.id, &data.subject, data.expires_in_days)
        .await?;
    Ok(Json(ClusterTokenResponse {
        token,
        subject: data.subject,
        expires_in_days: data.expires_in_days,
        message: SAVE_TOKEN_MESSAGE.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/tokens/pulsar/secret",
    tag = "tokens",
    summary = "Set cluster token signing key",
    description = "Store the active environment's signing key, encrypted. Requires superuser.",
    request_body = ClusterTokenSecretRequest,
    responses(
        (status = 204, description = "Key stored"),
        (status = 400, description = "No active environment or empty key"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn set_cluster_token_secret(
    State(state): State<AppState>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
    Json(data): Json<ClusterTokenSecretRequest>,
) -> Result<StatusCode> {
    if !state
        .api_tokens
        .set_cluster_token_secret(environment.id, &data.secret_key)
        .await?
    {
        return Err(Error::Internal {
            operation: "set secret key".to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/tokens/pulsar/secret",
    tag = "tokens",
    summary = "Remove cluster token signing key",
    responses(
        (status = 204, description = "Key removed"),
        (status = 400, description = "No active environment"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn remove_cluster_token_secret(
    State(state): State<AppState>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
) -> Result<StatusCode> {
    if !state.api_tokens.remove_cluster_token_secret(environment.id).await? {
        return Err(Error::Internal {
            operation: "remove secret key".to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/tokens/admin/user/{user_id}",
    tag = "tokens",
    summary = "List a user's API tokens",
    description = "Revoked tokens are included unless `include_revoked=false`. Requires superuser.",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
        ListTokensQuery,
    ),
    responses(
        (status = 200, description = "The user's tokens", body = TokensResponse),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn admin_list_user_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<ListTokensQuery>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<TokensResponse>> {
    let tokens = state
        .api_tokens
        .list_tokens(user_id, query.include_revoked.unwrap_or(true))
        .await?;
    Ok(Json(tokens.into()))
}

#[utoipa::path(
    post,
    path = "/tokens/admin/user/{user_id}/revoke-all",
    tag = "tokens",
    summary = "Revoke all of a user's API tokens",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Tokens revoked", body = MessageResponse),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn admin_revoke_user_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<MessageResponse>> {
    let count = state.api_tokens.revoke_all_for_user(user_id).await?;
    Ok(Json(MessageResponse::new(format!("Revoked {count} token(s)"))))
}

#[cfg(test)]
mod tests {
    use crate::api::models::{
        rbac::MessageResponse,
        tokens::{ClusterTokenCapabilityResponse, ClusterTokenResponse, TokenCreatedResponse, TokenInfo, TokenStatsResponse, TokensResponse},
    };
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_create_token_returns_value_once() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let response = app
            .post("/api/v1/tokens")
            .authorization_bearer(&token)
            .json(&json!({ "name": "ci", "expires_in_days": 30, "scopes": ["read"] }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: TokenCreatedResponse = response.json();
        assert!(created.token.starts_with("pc_"));
        assert_eq!(created.token_prefix, &created.token[..8]);
        assert_eq!(created.message, "Save this token now. It will not be shown again.");
        assert!(created.expires_at.is_some());

        // The new token authenticates
        let response = app.get(&format!("/api/v1/tokens/{}", created.id)).authorization_bearer(&created.token).await;
        response.assert_status_ok();
        let info: TokenInfo = response.json();
        assert!(info.is_valid);
        assert!(!info.is_expired);
        assert!(!response.text().contains(&created.token));
    }

    #[test_log::test(tokio::test)]
    async fn test_create_token_validation() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let response = app
            .post("/api/v1/tokens")
            .authorization_bearer(&token)
            .json(&json!({ "name": "   " }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "Token name cannot be empty" }));

        let response = app
            .post("/api/v1/tokens")
            .authorization_bearer(&token)
            .json(&json!({ "name": "forever", "expires_in_days": 1_000_000_000_i64 }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "expires_in_days is out of range" }));
    }

    #[test_log::test(tokio::test)]
    async fn test_revoke_and_list() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let (_, second) = state.api_tokens.create_token(user.id, "second", None, None).await.unwrap();
        let app = create_test_app(state);

        let response = app
            .post(&format!("/api/v1/tokens/{}/revoke", second.id))
            .authorization_bearer(&token)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Token revoked");

        let listed: TokensResponse = app.get("/api/v1/tokens").authorization_bearer(&token).await.json();
        assert_eq!(listed.tokens.len(), 1);

        let listed: TokensResponse = app
            .get("/api/v1/tokens?include_revoked=true")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(listed.tokens.len(), 2);
        let revoked = listed.tokens.iter().find(|t| t.id == second.id).unwrap();
        assert!(revoked.is_revoked);
        assert!(!revoked.is_valid);

        let stats: TokenStatsResponse = app.get("/api/v1/tokens/stats").authorization_bearer(&token).await.json();
        assert_eq!((stats.total, stats.active, stats.revoked, stats.expired), (2, 1, 1, 0));

        app.delete(&format!("/api/v1/tokens/{}", second.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.delete(&format!("/api/v1/tokens/{}", second.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_tokens_of_other_users_are_not_found() {
        let state = create_test_state().await;
        let alice = create_test_user(&state, "alice@example.com").await;
        let bob = create_test_user(&state, "bob@example.com").await;
        let alice_token = bearer_token(&state, alice.id).await;
        let (_, bobs) = state.api_tokens.create_token(bob.id, "bob", None, None).await.unwrap();
        let app = create_test_app(state);

        let response = app.get(&format!("/api/v1/tokens/{}", bobs.id)).authorization_bearer(&alice_token).await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": "Token not found" }));

        app.post(&format!("/api/v1/tokens/{}/revoke", bobs.id))
            .authorization_bearer(&alice_token)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_revoke_all_locks_caller_out() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        state.api_tokens.create_token(user.id, "other", None, None).await.unwrap();
        let app = create_test_app(state);

        let response = app.post("/api/v1/tokens/revoke-all").authorization_bearer(&token).await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Revoked 2 token(s)");

        app.get("/api/v1/tokens")
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_token_endpoints() {
        let state = create_test_state().await;
        let admin = admin_token(&state).await;
        let user = create_test_user(&state, "dev@example.com").await;
        let user_token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        app.get(&format!("/api/v1/tokens/admin/user/{}", user.id))
            .authorization_bearer(&user_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = app
            .post(&format!("/api/v1/tokens/admin/user/{}/revoke-all", user.id))
            .authorization_bearer(&admin)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Revoked 1 token(s)");

        // Revoked tokens are listed by default on the admin surface
        let listed: TokensResponse = app
            .get(&format!("/api/v1/tokens/admin/user/{}", user.id))
            .authorization_bearer(&admin)
            .await
            .json();
        assert_eq!(listed.tokens.len(), 1);
        assert!(listed.tokens[0].is_revoked);
    }

    #[test_log::test(tokio::test)]
    async fn test_cluster_token_flow() {
        let state = create_test_state().await;
        let admin = admin_token(&state).await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let capability: ClusterTokenCapabilityResponse = app
            .get("/api/v1/tokens/pulsar/capability")
            .authorization_bearer(&token)
            .await
            .json();
        assert!(!capability.can_generate);
        assert_eq!(capability.environment_name.as_deref(), Some("test"));

        let response = app
            .post("/api/v1/tokens/pulsar/generate")
            .authorization_bearer(&token)
            .json(&json!({ "subject": "orders-service" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "Pulsar token secret key not configured for this environment" }));

        // Only superusers manage the signing key
        app.post("/api/v1/tokens/pulsar/secret")
            .authorization_bearer(&token)
            .json(&json!({ "secret_key": "cluster-signing-key" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.post("/api/v1/tokens/pulsar/secret")
            .authorization_bearer(&admin)
            .json(&json!({ "secret_key": "cluster-signing-key" }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response = app
            .post("/api/v1/tokens/pulsar/generate")
            .authorization_bearer(&token)
            .json(&json!({ "subject": "orders-service", "expires_in_days": 7 }))
            .await;
        response.assert_status_ok();
        let generated: ClusterTokenResponse = response.json();
        assert_eq!(generated.subject, "orders-service");

        let mut validation = Validation::default();
        validation.required_spec_claims.clear();
        let claims = decode::<serde_json::Value>(
            &generated.token,
            &DecodingKey::from_secret(b"cluster-signing-key"),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims["sub"], "orders-service");
        assert!(claims.get("exp").is_some());

        let response = app
            .post("/api/v1/tokens/pulsar/generate")
            .authorization_bearer(&token)
            .json(&json!({ "subject": "orders-service", "expires_in_days": 0 }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = app
            .post("/api/v1/tokens/pulsar/generate")
            .authorization_bearer(&token)
            .json(&json!({ "subject": "orders-service", "expires_in_days": 1_000_000_000_i64 }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "expires_in_days is out of range" }));

        app.delete("/api/v1/tokens/pulsar/secret")
            .authorization_bearer(&admin)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let capability: ClusterTokenCapabilityResponse = app
            .get("/api/v1/tokens/pulsar/capability")
            .authorization_bearer(&token)
            .await
            .json();
        assert!(!capability.can_generate);
    }
}
