//! OpenAPI documentation for the `/api/v1` surface.
//!
//! Served as JSON at `/api-docs/openapi.json` and browsable at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// The three ways a caller can authenticate.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some(
                        "A session access token or a `pc_` API token:\n\n\
                        ```\nAuthorization: Bearer YOUR_TOKEN\n```",
                    ))
                    .build(),
            ),
        );
        components.security_schemes.insert(
            "ApiToken".to_string(),
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "X-API-Token",
                "A `pc_` API token. The header name is configurable with `auth.api_token_header`.",
            ))),
        );
        components.security_schemes.insert(
            "SessionCookie".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "pmctl_session",
                "The session access token, set by `/auth/refresh` and `/auth/oidc/callback`.",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pmctl",
        description = "Authorization and credential management for the Pulsar admin console"
    ),
    servers(
        (url = "/api/v1", description = "Console API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::rbac::list_permissions,
        api::handlers::rbac::list_roles,
        api::handlers::rbac::get_role,
        api::handlers::rbac::create_role,
        api::handlers::rbac::update_role,
        api::handlers::rbac::delete_role,
        api::handlers::rbac::list_role_users,
        api::handlers::rbac::add_role_permission,
        api::handlers::rbac::remove_role_permission,
        api::handlers::rbac::set_role_permissions,
        api::handlers::rbac::list_users,
        api::handlers::rbac::assign_user_role,
        api::handlers::rbac::remove_user_role,
        api::handlers::rbac::set_user_roles,
        api::handlers::rbac::check_permission,
        api::handlers::rbac::my_permissions,
        api::handlers::rbac::get_user_permissions,
        api::handlers::tokens::create_token,
        api::handlers::tokens::list_tokens,
        api::handlers::tokens::token_stats,
        api::handlers::tokens::get_token,
        api::handlers::tokens::revoke_token,
        api::handlers::tokens::delete_token,
        api::handlers::tokens::revoke_all_tokens,
        api::handlers::tokens::cluster_token_capability,
        api::handlers::tokens::generate_cluster_token,
        api::handlers::tokens::set_cluster_token_secret,
        api::handlers::tokens::remove_cluster_token_secret,
        api::handlers::tokens::admin_list_user_tokens,
        api::handlers::tokens::admin_revoke_user_tokens,
        api::handlers::auth::refresh,
        api::handlers::auth::logout,
        api::handlers::auth::list_sessions,
        api::handlers::auth::revoke_session,
        api::handlers::auth::revoke_other_sessions,
        api::handlers::environments::list_environments,
        api::handlers::environments::create_environment,
        api::handlers::environments::activate_environment,
        api::handlers::environments::set_environment_rbac,
        api::handlers::oidc::get_provider,
        api::handlers::oidc::configure_provider,
        api::handlers::oidc::delete_provider,
        api::handlers::oidc::enable_provider,
        api::handlers::oidc::disable_provider,
        api::handlers::oidc::update_client_secret,
        api::handlers::oidc::list_login_providers,
        api::handlers::oidc::authorize,
        api::handlers::oidc::callback,
    ),
    components(
        schemas(
            crate::types::Action,
            crate::types::ResourceLevel,
        )
    ),
    tags(
        (name = "rbac", description = "Roles, permissions and permission checks"),
        (name = "tokens", description = "API tokens and cluster tokens"),
        (name = "auth", description = "Session refresh and session management"),
        (name = "environments", description = "Managed clusters"),
        (name = "oidc", description = "OpenID Connect providers and login"),
    )
)]
pub struct ApiDoc;
