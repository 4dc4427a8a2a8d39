//! Route-level RBAC.
//!
//! [`rbac_enforcement`] maps `(method, path)` to a required permission through the configured
//! [`RouteTable`] and checks it against the caller's grants in the active environment. This is a
//! coarse check with no resource path; handlers that act on one resource check it themselves.
//!
//! Requests pass through untouched when no route matches, when the path is public, when no
//! credential is present (the handler's extractor answers 401), and when the active environment
//! has RBAC switched off.

use std::fmt;

use axum::{
    Json,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use anyhow::Context;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    AppState,
    auth::current_user::authenticate,
    config::{RbacEnforcement, RoutePermission},
    errors::Error,
    types::{Action, ResourceLevel, abbrev_uuid},
};

/// The permission a route needs. Inserted into request extensions for matched routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredPermission {
    pub action: Action,
    pub resource_level: ResourceLevel,
}

impl fmt::Display for RequiredPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource_level)
    }
}

#[derive(Debug)]
struct CompiledRoute {
    method: Method,
    path: Regex,
    required: RequiredPermission,
}

/// Ordered, compiled route permission table. First match wins.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn compile(routes: &[RoutePermission]) -> anyhow::Result<Self> {
        let routes = routes
            .iter()
            .map(|route| {
                // Patterns always match from the start of the path
                let anchored = if route.path.starts_with('^') {
                    route.path.clone()
                } else {
                    format!("^{}", route.path)
                };
                Ok(CompiledRoute {
                    method: route
                        .method
                        .to_uppercase()
                        .parse()
                        .with_context(|| format!("invalid HTTP method '{}'", route.method))?,
                    path: Regex::new(&anchored).with_context(|| format!("invalid route pattern '{}'", route.path))?,
                    required: RequiredPermission {
                        action: route.action,
                        resource_level: route.resource_level,
                    },
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    pub fn required_permission(&self, method: &Method, path: &str) -> Option<RequiredPermission> {
        self.routes
            .iter()
            .find(|r| r.method == method && r.path.is_match(path))
            .map(|r| r.required)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn permission_denied(required: RequiredPermission) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "detail": format!("Permission denied: {required}") })),
    )
        .into_response()
}

pub async fn rbac_enforcement(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match check_route(&state, request).await {
        Ok(Ok(request)) => next.run(request).await,
        Ok(Err(denied)) => denied,
        Err(e) => e.into_response(),
    }
}

/// `Ok(Ok(request))` to continue, `Ok(Err(response))` to answer early.
async fn check_route(state: &AppState, request: Request) -> Result<Result<Request, Response>, Error> {
    let path = request.uri().path();
    if state.config.auth.public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return Ok(Ok(request));
    }
    let Some(required) = state.routes.required_permission(request.method(), path) else {
        return Ok(Ok(request));
    };

    let (mut parts, body) = request.into_parts();
    let Some(user) = authenticate(&parts, state).await? else {
        return Ok(Ok(Request::from_parts(parts, body)));
    };
    parts.extensions.insert(user.clone());
    parts.extensions.insert(required);
    let request = Request::from_parts(parts, body);

    let Some(environment) = state.store.get_active_environment().await? else {
        debug!("No active environment, skipping route check");
        return Ok(Ok(request));
    };
    if !environment.rbac_enabled {
        return Ok(Ok(request));
    }

    let allowed = state
        .rbac
        .check_permission(user.id, environment.id, required.action, required.resource_level, None)
        .await?;
    if allowed {
        return Ok(Ok(request));
    }

    match state.config.rbac.enforcement {
        RbacEnforcement::Enforce => {
            warn!(
                user_id = %abbrev_uuid(&user.id),
                permission = %required,
                path = %request.uri().path(),
                "Permission denied"
            );
            Ok(Err(permission_denied(required)))
        }
        RbacEnforcement::Annotate => {
            info!(
                user_id = %abbrev_uuid(&user.id),
                permission = %required,
                path = %request.uri().path(),
                "Permission missing (annotate mode, request allowed)"
            );
            Ok(Ok(request))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::current_user::CurrentUser,
        config::default_route_permissions,
        db::models::environments::EnvironmentUpdateDBRequest,
        test_utils::{assign_system_role, create_test_state, create_test_state_with, create_test_user},
    };
    use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};
    use axum_test::TestServer;

    #[test]
    fn test_route_table_matching() {
        let table = RouteTable::compile(&default_route_permissions()).unwrap();
        let required = |m: Method, p: &str| table.required_permission(&m, p).map(|r| r.to_string());

        assert_eq!(required(Method::GET, "/api/v1/tenants").as_deref(), Some("read:tenant"));
        assert_eq!(required(Method::DELETE, "/api/v1/tenants/acme").as_deref(), Some("admin:tenant"));
        assert_eq!(required(Method::GET, "/api/v1/tenants/acme/namespaces").as_deref(), Some("read:namespace"));
        assert_eq!(required(Method::POST, "/api/v1/messages/produce").as_deref(), Some("produce:topic"));
        assert_eq!(required(Method::GET, "/api/v1/subscriptions/acme/x").as_deref(), Some("read:topic"));
        // `$`-anchored rows do not match deeper paths
        assert_eq!(required(Method::GET, "/api/v1/topics/a/b"), None);
        assert_eq!(required(Method::PATCH, "/api/v1/tenants"), None);
        assert_eq!(required(Method::GET, "/api/v1/rbac/roles"), None);
    }

    #[test]
    fn test_route_table_anchors_unanchored_patterns() {
        let table = RouteTable::compile(&[RoutePermission {
            method: "get".to_string(),
            path: "/api/v1/brokers".to_string(),
            action: Action::Read,
            resource_level: ResourceLevel::Cluster,
        }])
        .unwrap();
        assert!(table.required_permission(&Method::GET, "/api/v1/brokers/b1").is_some());
        assert!(table.required_permission(&Method::GET, "/proxy/api/v1/brokers").is_none());
    }

    #[test]
    fn test_route_table_rejects_bad_patterns() {
        let err = RouteTable::compile(&[RoutePermission {
            method: "GET".to_string(),
            path: "^/api/(".to_string(),
            action: Action::Read,
            resource_level: ResourceLevel::Cluster,
        }])
        .unwrap_err();
        assert!(format!("{err:#}").contains("invalid route pattern"));
    }

    async fn topics(user: CurrentUser, required: Option<Extension<RequiredPermission>>) -> String {
        format!(
            "{} {}",
            user.email,
            required.map(|Extension(r)| r.to_string()).unwrap_or_default()
        )
    }

    fn server(state: AppState) -> TestServer {
        let router = Router::new()
            .route("/api/v1/topics", get(topics).post(topics))
            .route("/api/v1/other", get(topics))
            .layer(from_fn_with_state(state.clone(), rbac_enforcement))
            .with_state(state);
        TestServer::new(router).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_enforce_mode_blocks_missing_permission() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "viewer@example.com").await;
        assign_system_role(&state, user.id, "viewer").await;
        let (token, _) = state.api_tokens.create_token(user.id, "t", None, None).await.unwrap();
        let server = server(state);

        let response = server.get("/api/v1/topics").authorization_bearer(&token).await;
        response.assert_status_ok();
        response.assert_text("viewer@example.com read:topic");

        let response = server.post("/api/v1/topics").authorization_bearer(&token).await;
        response.assert_status(StatusCode::FORBIDDEN);
        response.assert_json(&json!({ "detail": "Permission denied: write:topic" }));

        // Unmatched routes only need authentication
        server.get("/api/v1/other").authorization_bearer(&token).await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_unauthenticated_requests_reach_the_extractor() {
        let state = create_test_state().await;
        let server = server(state);

        let response = server.get("/api/v1/topics").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        response.assert_json(&json!({ "detail": "Not authenticated" }));

        let response = server.get("/api/v1/topics").authorization_bearer("pc_bogus").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        response.assert_json(&json!({ "detail": "Invalid or expired credentials" }));
    }

    #[test_log::test(tokio::test)]
    async fn test_annotate_mode_lets_request_through() {
        let state = create_test_state_with(|config| config.rbac.enforcement = RbacEnforcement::Annotate).await;
        let user = create_test_user(&state, "nobody@example.com").await;
        let (token, _) = state.api_tokens.create_token(user.id, "t", None, None).await.unwrap();
        let server = server(state);

        let response = server.post("/api/v1/topics").authorization_bearer(&token).await;
        response.assert_status_ok();
        response.assert_text("nobody@example.com write:topic");
    }

    #[test_log::test(tokio::test)]
    async fn test_rbac_disabled_environment_skips_check() {
        let state = create_test_state().await;
        let env = state.store.get_active_environment().await.unwrap().unwrap();
        state
            .store
            .update_environment(
                env.id,
                &EnvironmentUpdateDBRequest {
                    rbac_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user = create_test_user(&state, "nobody@example.com").await;
        let (token, _) = state.api_tokens.create_token(user.id, "t", None, None).await.unwrap();
        let server = server(state);

        server.post("/api/v1/topics").authorization_bearer(&token).await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_denied_request_never_reaches_handler() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };

        use axum::{body::Body, http::header::AUTHORIZATION, routing::post};
        use tower::ServiceExt;

        let state = create_test_state().await;
        let user = create_test_user(&state, "viewer@example.com").await;
        assign_system_role(&state, user.id, "viewer").await;
        let (token, _) = state.api_tokens.create_token(user.id, "t", None, None).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new()
            .route(
                "/api/v1/topics",
                post(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "created"
                }),
            )
            .layer(from_fn_with_state(state.clone(), rbac_enforcement))
            .with_state(state);

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/topics")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_global_admin_bypasses_route_check() {
        let state = create_test_state().await;
        let admin = state.store.get_user_by_email(&state.config.admin_email).await.unwrap().unwrap();
        let (token, _) = state.api_tokens.create_token(admin.id, "t", None, None).await.unwrap();
        let server = server(state);

        server.post("/api/v1/topics").authorization_bearer(&token).await.assert_status_ok();
    }
}
