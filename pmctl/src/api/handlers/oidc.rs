//! OIDC providers and the login exchange.
//!
//! Provider administration lives under `/environments/{environment_id}/oidc` and needs a
//! superuser. The `/auth/oidc/*` endpoints are public: they run the authorization-code login
//! against the active environment's provider and end in an ordinary session.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::{
        handlers::auth::{client_ip, user_agent},
        models::{
            oidc::{
                ClientSecretUpdate, OidcAuthorizeRequest, OidcAuthorizeResponse, OidcCallbackRequest,
                OidcLoginProvider, OidcLoginProvidersResponse, OidcProviderConfigure, OidcProviderResponse,
            },
            sessions::{TokenPairResponse, WithSessionCookie, session_cookie},
        },
    },
    auth::current_user::CurrentSuperuser,
    errors::{Error, Result},
    types::{EnvironmentId, abbrev_uuid},
};

fn provider_not_found(environment_id: EnvironmentId) -> Error {
    Error::NotFound {
        resource: "OIDC provider".to_string(),
        id: environment_id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/environments/{environment_id}/oidc",
    tag = "oidc",
    summary = "Get OIDC provider",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Provider settings", body = OidcProviderResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "No provider configured"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn get_provider(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<OidcProviderResponse>> {
    let provider = state
        .oidc
        .get_provider(environment_id)
        .await?
        .ok_or_else(|| provider_not_found(environment_id))?;
    Ok(Json(provider.into()))
}

/// Create or replace the environment's provider. The client secret is encrypted before storage.
#[utoipa::path(
    put,
    path = "/environments/{environment_id}/oidc",
    tag = "oidc",
    summary = "Configure OIDC provider",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    request_body = OidcProviderConfigure,
    responses(
        (status = 200, description = "Provider saved", body = OidcProviderResponse),
        (status = 400, description = "Invalid settings"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Environment not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn configure_provider(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(admin): CurrentSuperuser,
    Json(data): Json<OidcProviderConfigure>,
) -> Result<Json<OidcProviderResponse>> {
    let provider = state.oidc.configure_provider(environment_id, data.into()).await?;
    info!(
        environment_id = %abbrev_uuid(&environment_id),
        configured_by = %abbrev_uuid(&admin.id),
        "OIDC provider saved"
    );
    Ok(Json(provider.into()))
}

#[utoipa::path(
    delete,
    path = "/environments/{environment_id}/oidc",
    tag = "oidc",
    summary = "Delete OIDC provider",
    description = "Remove the provider; logins already in flight are abandoned",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    responses(
        (status = 204, description = "Provider deleted"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "No provider configured"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<StatusCode> {
    if !state.oidc.delete_provider(environment_id).await? {
        return Err(provider_not_found(environment_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/environments/{environment_id}/oidc/enable",
    tag = "oidc",
    summary = "Enable OIDC provider",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Provider enabled", body = OidcProviderResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "No provider configured"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn enable_provider(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<OidcProviderResponse>> {
    Ok(Json(state.oidc.set_enabled(environment_id, true).await?.into()))
}

#[utoipa::path(
    post,
    path = "/environments/{environment_id}/oidc/disable",
    tag = "oidc",
    summary = "Disable OIDC provider",
    description = "New logins are refused and pending callbacks fail; existing sessions are untouched",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Provider disabled", body = OidcProviderResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "No provider configured"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn disable_provider(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<OidcProviderResponse>> {
    Ok(Json(state.oidc.set_enabled(environment_id, false).await?.into()))
}

#[utoipa::path(
    put,
    path = "/environments/{environment_id}/oidc/client-secret",
    tag = "oidc",
    summary = "Rotate OIDC client secret",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    request_body = ClientSecretUpdate,
    responses(
        (status = 200, description = "Secret updated", body = OidcProviderResponse),
        (status = 400, description = "A secret is required while PKCE is disabled"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "No provider configured"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn update_client_secret(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    Json(data): Json<ClientSecretUpdate>,
) -> Result<Json<OidcProviderResponse>> {
    let provider = state
        .oidc
        .update_client_secret(environment_id, data.client_secret.as_deref())
        .await?;
    Ok(Json(provider.into()))
}

#[utoipa::path(
    get,
    path = "/auth/oidc/providers",
    tag = "oidc",
    summary = "List login providers",
    responses(
        (status = 200, description = "Enabled providers", body = OidcLoginProvidersResponse),
    )
)]
pub async fn list_login_providers(State(state): State<AppState>) -> Result<Json<OidcLoginProvidersResponse>> {
    let active = state.store.get_active_environment().await?.map(|e| e.id);
    let providers = state.oidc.enabled_providers().await?;
    Ok(Json(OidcLoginProvidersResponse {
        providers: providers.into_iter().map(|p| OidcLoginProvider::new(p, active)).collect(),
    }))
}

/// Start a login against the active environment's provider.
#[utoipa::path(
    post,
    path = "/auth/oidc/authorize",
    tag = "oidc",
    summary = "Start OIDC login",
    request_body = OidcAuthorizeRequest,
    responses(
        (status = 200, description = "Where to send the user", body = OidcAuthorizeResponse),
        (status = 400, description = "Invalid redirect URI or code challenge"),
        (status = 404, description = "No enabled provider for the active environment"),
        (status = 502, description = "Identity provider unavailable"),
    )
)]
#[instrument(skip_all)]
pub async fn authorize(
    State(state): State<AppState>,
    Json(data): Json<OidcAuthorizeRequest>,
) -> Result<Json<OidcAuthorizeResponse>> {
    let request = state
        .oidc
        .begin_login(&data.redirect_uri, data.code_challenge.as_deref())
        .await?;
    Ok(Json(request.into()))
}

/// Redeem the provider's authorization code for a console session.
///
/// The `state` is single-use; a failed callback spends it too.
#[utoipa::path(
    post,
    path = "/auth/oidc/callback",
    tag = "oidc",
    summary = "Complete OIDC login",
    request_body = OidcCallbackRequest,
    responses(
        (status = 200, description = "Token pair; the session cookie is set to the access token", body = TokenPairResponse),
        (status = 400, description = "No console account for this identity"),
        (status = 401, description = "Invalid or expired credentials"),
        (status = 502, description = "Identity provider unavailable"),
    )
)]
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(data): Json<OidcCallbackRequest>,
) -> Result<WithSessionCookie<TokenPairResponse>> {
    let pair = state
        .oidc
        .complete_login(
            &data.code,
            &data.state,
            data.code_verifier.as_deref(),
            client_ip(&headers),
            user_agent(&headers),
        )
        .await?;

    let cookie = session_cookie(&state.config.auth.session_cookie_name, &pair.access_token, pair.expires_in);
    Ok(WithSessionCookie {
        body: pair.into(),
        cookie,
    })
}
