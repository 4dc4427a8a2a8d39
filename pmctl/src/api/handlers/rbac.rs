//! Roles, permissions and role assignments in the active environment.
//!
//! Reads are open to any authenticated user; anything that changes who can do what requires a
//! superuser.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    AppState,
    api::models::rbac::{
        AddPermissionRequest, AssignRoleRequest, CheckPermissionRequest, CheckPermissionResponse, ListRolesQuery,
        ListUsersQuery, MessageResponse, PermissionInfo, PermissionsResponse, RemovePermissionQuery, RoleCreate, RoleInfo,
        RoleMembersResponse, RoleUpdate, RolesResponse, SetPermissionsRequest, SetUserRolesRequest, UserPermissionsResponse, UsersResponse,
    },
    auth::current_user::{ActiveEnvironment, CurrentSuperuser, CurrentUser},
    errors::{Error, Result},
    types::{EnvironmentId, PermissionId, RoleId, UserId},
};

const MAX_PAGE_SIZE: i64 = 1000;
const DEFAULT_PAGE_SIZE: i64 = 100;

async fn role_info(state: &AppState, role_id: RoleId) -> Result<RoleInfo> {
    state
        .rbac
        .get_role(role_id)
        .await?
        .map(RoleInfo::from)
        .ok_or_else(|| Error::NotFound {
            resource: "Role".to_string(),
            id: role_id.to_string(),
        })
}

async fn user_permissions(state: &AppState, user_id: UserId, environment_id: EnvironmentId) -> Result<UserPermissionsResponse> {
    let permissions = state.rbac.get_user_permissions(user_id, environment_id).await?;
    Ok(UserPermissionsResponse {
        permissions: permissions.into_iter().map(Into::into).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "rbac",
    summary = "List permissions",
    description = "Every permission definition, grouped by action",
    responses(
        (status = 200, description = "Permission catalogue", body = PermissionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_permissions(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<PermissionsResponse>> {
    let grouped = state.rbac.get_permissions_grouped().await?;
    Ok(Json(PermissionsResponse {
        permissions: grouped
            .into_iter()
            .map(|(action, permissions)| (action, permissions.into_iter().map(PermissionInfo::from).collect()))
            .collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "rbac",
    summary = "List roles",
    description = "Roles of the active environment with their grants",
    params(ListRolesQuery),
    responses(
        (status = 200, description = "Roles", body = RolesResponse),
        (status = 400, description = "No active environment configured"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Query(query): Query<ListRolesQuery>,
    _user: CurrentUser,
    ActiveEnvironment(environment): ActiveEnvironment,
) -> Result<Json<RolesResponse>> {
    let roles = state
        .rbac
        .list_roles(environment.id, query.include_system.unwrap_or(true))
        .await?;
    Ok(Json(RolesResponse {
        roles: roles.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "rbac",
    summary = "Get role",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role", body = RoleInfo),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Role not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn get_role(State(state): State<AppState>, Path(role_id): Path<RoleId>, _user: CurrentUser) -> Result<Json<RoleInfo>> {
    Ok(Json(role_info(&state, role_id).await?))
}

#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "rbac",
    summary = "Create role",
    description = "Create a custom role in the active environment. Requires superuser.",
    request_body = RoleCreate,
    responses(
        (status = 201, description = "Role created", body = RoleInfo),
        (status = 400, description = "Invalid or duplicate name"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
    Json(data): Json<RoleCreate>,
) -> Result<(StatusCode, Json<RoleInfo>)> {
    let role = state.rbac.create_role(environment.id, &data.name, data.description).await?;
    Ok((StatusCode::CREATED, Json(role_info(&state, role.id).await?)))
}

#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}",
    tag = "rbac",
    summary = "Update role",
    description = "Rename a custom role or change any role's description. Requires superuser.",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Role updated", body = RoleInfo),
        (status = 400, description = "Invalid name, or renaming a system role"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Role not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    Json(data): Json<RoleUpdate>,
) -> Result<Json<RoleInfo>> {
    state
        .rbac
        .update_role(role_id, data.name.as_deref(), data.description)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Role".to_string(),
            id: role_id.to_string(),
        })?;
    Ok(Json(role_info(&state, role_id).await?))
}

#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "rbac",
    summary = "Delete role",
    description = "Delete a custom role and its assignments. System roles cannot be deleted.",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 400, description = "Role not found or is a system role"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<StatusCode> {
    if state.rbac.delete_role(role_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::BadRequest {
            message: "Role not found or is a system role".to_string(),
        })
    }
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/users",
    tag = "rbac",
    summary = "List role holders",
    description = "Every user holding the role, oldest assignment first. Requires superuser.",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role holders", body = RoleMembersResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Role not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_role_users(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<RoleMembersResponse>> {
    let users = state.rbac.get_role_users(role_id).await?;
    Ok(Json(RoleMembersResponse {
        role_id,
        users: users.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "rbac",
    summary = "Grant permission to role",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    request_body = AddPermissionRequest,
    responses(
        (status = 200, description = "Updated role", body = RoleInfo),
        (status = 400, description = "Unknown permission or invalid resource pattern"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Role not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn add_role_permission(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    Json(data): Json<AddPermissionRequest>,
) -> Result<Json<RoleInfo>> {
    state
        .rbac
        .add_permission_to_role(role_id, data.permission_id, data.resource_pattern)
        .await?;
    Ok(Json(role_info(&state, role_id).await?))
}

#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "rbac",
    summary = "Revoke permission from role",
    description = "Removes the grant with exactly this pattern; omit `resource_pattern` for the unscoped grant.",
    params(
        ("role_id" = uuid::Uuid, Path, description = "Role ID"),
        ("permission_id" = uuid::Uuid, Path, description = "Permission ID"),
        RemovePermissionQuery,
    ),
    responses(
        (status = 200, description = "Permission removed", body = MessageResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Permission not found on role"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn remove_role_permission(
    State(state): State<AppState>,
    Path((role_id, permission_id)): Path<(RoleId, PermissionId)>,
    Query(query): Query<RemovePermissionQuery>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<MessageResponse>> {
    let removed = state
        .rbac
        .remove_permission_from_role(role_id, permission_id, query.resource_pattern.as_deref())
        .await?;
    if !removed {
        return Err(Error::NotFoundMessage {
            message: "Permission not found on role".to_string(),
        });
    }
    Ok(Json(MessageResponse::new("Permission removed")))
}

#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "rbac",
    summary = "Replace role permissions",
    description = "Replace every grant of the role. Nothing changes if any entry is invalid.",
    params(("role_id" = uuid::Uuid, Path, description = "Role ID")),
    request_body = SetPermissionsRequest,
    responses(
        (status = 200, description = "Updated role", body = RoleInfo),
        (status = 400, description = "Unknown permission or invalid resource pattern"),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Role not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn set_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    Json(data): Json<SetPermissionsRequest>,
) -> Result<Json<RoleInfo>> {
    let grants = data
        .permissions
        .into_iter()
        .map(|p| (p.permission_id, p.resource_pattern))
        .collect();
    state.rbac.set_role_permissions(role_id, grants).await?;
    Ok(Json(role_info(&state, role_id).await?))
}

#[utoipa::path(
    get,
    path = "/rbac/users",
    tag = "rbac",
    summary = "List users with roles",
    description = "A page of users, each with their roles in the active environment",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Users", body = UsersResponse),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
) -> Result<Json<UsersResponse>> {
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let users = state.rbac.get_users_with_roles(environment.id, skip, limit).await?;
    Ok(Json(UsersResponse {
        users: users.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "rbac",
    summary = "Assign role to user",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = MessageResponse),
        (status = 400, description = "User or role not found"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn assign_user_role(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    CurrentSuperuser(admin): CurrentSuperuser,
    Json(data): Json<AssignRoleRequest>,
) -> Result<Json<MessageResponse>> {
    state.rbac.assign_role_to_user(user_id, data.role_id, Some(admin.id)).await?;
    Ok(Json(MessageResponse::new("Role assigned")))
}

#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "rbac",
    summary = "Remove role from user",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
        ("role_id" = uuid::Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role removed", body = MessageResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "User does not have this role"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn remove_user_role(
    State(state): State<AppState>,
    Path((user_id, role_id)): Path<(UserId, RoleId)>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<MessageResponse>> {
    if !state.rbac.remove_role_from_user(user_id, role_id).await? {
        return Err(Error::NotFoundMessage {
            message: "User does not have this role".to_string(),
        });
    }
    Ok(Json(MessageResponse::new("Role removed")))
}

#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/roles",
    tag = "rbac",
    summary = "Replace user roles",
    description = "Replace the user's roles in the active environment. Other environments are untouched.",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    request_body = SetUserRolesRequest,
    responses(
        (status = 200, description = "Roles updated", body = MessageResponse),
        (status = 400, description = "Unknown user, or a role outside the active environment"),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn set_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    CurrentSuperuser(admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
    Json(data): Json<SetUserRolesRequest>,
) -> Result<Json<MessageResponse>> {
    state
        .rbac
        .set_user_roles(user_id, environment.id, &data.role_ids, Some(admin.id))
        .await?;
    Ok(Json(MessageResponse::new("Roles updated")))
}

#[utoipa::path(
    post,
    path = "/rbac/check",
    tag = "rbac",
    summary = "Check a permission",
    description = "Whether the caller may perform an action, optionally on one resource path",
    request_body = CheckPermissionRequest,
    responses(
        (status = 200, description = "Decision", body = CheckPermissionResponse),
        (status = 400, description = "No active environment configured"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    user: CurrentUser,
    ActiveEnvironment(environment): ActiveEnvironment,
    Json(data): Json<CheckPermissionRequest>,
) -> Result<Json<CheckPermissionResponse>> {
    let decision = state
        .rbac
        .authorize(
            user.id,
            environment.id,
            data.action,
            data.resource_level,
            data.resource_path.as_deref(),
        )
        .await?;
    Ok(Json(CheckPermissionResponse {
        allowed: decision.is_allowed(),
        reason: decision.reason().to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/rbac/my-permissions",
    tag = "rbac",
    summary = "Caller's effective permissions",
    responses(
        (status = 200, description = "Grants held through roles", body = UserPermissionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    user: CurrentUser,
    ActiveEnvironment(environment): ActiveEnvironment,
) -> Result<Json<UserPermissionsResponse>> {
    Ok(Json(user_permissions(&state, user.id, environment.id).await?))
}

#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/permissions",
    tag = "rbac",
    summary = "User's effective permissions",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Grants held through roles", body = UserPermissionsResponse),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    CurrentSuperuser(_admin): CurrentSuperuser,
    ActiveEnvironment(environment): ActiveEnvironment,
) -> Result<Json<UserPermissionsResponse>> {
    Ok(Json(user_permissions(&state, user_id, environment.id).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::models::rbac::{
        CheckPermissionResponse, MessageResponse, PermissionsResponse, RoleInfo, RoleMembersResponse, RolesResponse,
        UserPermissionsResponse, UsersResponse,
    };
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn permission_id(state: &crate::AppState, key: &str) -> uuid::Uuid {
        state
            .rbac
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.key() == key)
            .unwrap()
            .id
    }

    #[test_log::test(tokio::test)]
    async fn test_list_permissions_grouped_by_action() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let response = app.get("/api/v1/rbac/permissions").authorization_bearer(&token).await;
        response.assert_status_ok();
        let body: PermissionsResponse = response.json();
        assert_eq!(body.permissions.values().map(Vec::len).sum::<usize>(), 17);
        assert_eq!(body.permissions["produce"].len(), 1);
        assert_eq!(body.permissions["produce"][0].full_name, "produce:topic");
        assert_eq!(body.permissions["admin"].len(), 4);
    }

    #[test_log::test(tokio::test)]
    async fn test_list_roles_includes_system_roles() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let body: RolesResponse = app.get("/api/v1/rbac/roles").authorization_bearer(&token).await.json();
        let mut names: Vec<_> = body.roles.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["admin", "developer", "operator", "superuser", "viewer"]);

        let body: RolesResponse = app
            .get("/api/v1/rbac/roles?include_system=false")
            .authorization_bearer(&token)
            .await
            .json();
        assert!(body.roles.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_role_management_requires_superuser() {
        let state = create_test_state().await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let response = app
            .post("/api/v1/rbac/roles")
            .authorization_bearer(&token)
            .json(&json!({ "name": "topic-writers" }))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);

        app.post("/api/v1/rbac/roles")
            .json(&json!({ "name": "topic-writers" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_role_lifecycle() {
        let state = create_test_state().await;
        let token = admin_token(&state).await;
        let write_topic = permission_id(&state, "write:topic").await;
        let app = create_test_app(state);

        let response = app
            .post("/api/v1/rbac/roles")
            .authorization_bearer(&token)
            .json(&json!({ "name": "topic-writers", "description": "Writes orders topics" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let role: RoleInfo = response.json();
        assert!(!role.is_system);
        assert!(role.permissions.is_empty());

        // Duplicate names are rejected
        let response = app
            .post("/api/v1/rbac/roles")
            .authorization_bearer(&token)
            .json(&json!({ "name": "topic-writers" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "Role with name 'topic-writers' already exists" }));

        let response = app
            .post(&format!("/api/v1/rbac/roles/{}/permissions", role.id))
            .authorization_bearer(&token)
            .json(&json!({ "permission_id": write_topic, "resource_pattern": "acme/prod/orders-*" }))
            .await;
        response.assert_status_ok();
        let role: RoleInfo = response.json();
        assert_eq!(role.permissions.len(), 1);
        assert_eq!(role.permissions[0].resource_pattern.as_deref(), Some("acme/prod/orders-*"));

        let response = app
            .put(&format!("/api/v1/rbac/roles/{}", role.id))
            .authorization_bearer(&token)
            .json(&json!({ "name": "order-writers" }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<RoleInfo>().name, "order-writers");

        // Removing with the wrong pattern finds nothing
        let response = app
            .delete(&format!("/api/v1/rbac/roles/{}/permissions/{write_topic}", role.id))
            .authorization_bearer(&token)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": "Permission not found on role" }));

        let response = app
            .delete(&format!(
                "/api/v1/rbac/roles/{}/permissions/{write_topic}?resource_pattern=acme/prod/orders-*",
                role.id
            ))
            .authorization_bearer(&token)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Permission removed");

        app.delete(&format!("/api/v1/rbac/roles/{}", role.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response = app
            .get(&format!("/api/v1/rbac/roles/{}", role.id))
            .authorization_bearer(&token)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": format!("Role with ID {} not found", role.id) }));
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_resource_pattern_rejected() {
        let state = create_test_state().await;
        let token = admin_token(&state).await;
        let write_topic = permission_id(&state, "write:topic").await;
        let role = create_test_role(&state, "writers").await;
        let app = create_test_app(state);

        let response = app
            .post(&format!("/api/v1/rbac/roles/{}/permissions", role.id))
            .authorization_bearer(&token)
            .json(&json!({ "permission_id": write_topic, "resource_pattern": "acme/[prod*" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        // Replace-all is atomic: one bad entry leaves the role untouched
        let response = app
            .put(&format!("/api/v1/rbac/roles/{}/permissions", role.id))
            .authorization_bearer(&token)
            .json(&json!({ "permissions": [
                { "permission_id": write_topic },
                { "permission_id": write_topic, "resource_pattern": "acme/[prod*" },
            ]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let role: RoleInfo = app
            .get(&format!("/api/v1/rbac/roles/{}", role.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert!(role.permissions.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_system_roles_cannot_be_deleted() {
        let state = create_test_state().await;
        let token = admin_token(&state).await;
        let env = state.store.get_active_environment().await.unwrap().unwrap();
        let viewer = state.store.get_role_by_name(env.id, "viewer").await.unwrap().unwrap();
        let app = create_test_app(state);

        let response = app
            .delete(&format!("/api/v1/rbac/roles/{}", viewer.id))
            .authorization_bearer(&token)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "detail": "Role not found or is a system role" }));
    }

    #[test_log::test(tokio::test)]
    async fn test_user_role_assignment_and_check() {
        let state = create_test_state().await;
        let admin = admin_token(&state).await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        let role = create_test_role(&state, "orders-producers").await;
        let produce_topic = permission_id(&state, "produce:topic").await;
        state
            .rbac
            .add_permission_to_role(role.id, produce_topic, Some("acme/prod/orders-*".to_string()))
            .await
            .unwrap();
        let app = create_test_app(state);

        let check = json!({ "action": "produce", "resource_level": "topic", "resource_path": "acme/prod/orders-eu" });
        let body: CheckPermissionResponse = app.post("/api/v1/rbac/check").authorization_bearer(&token).json(&check).await.json();
        assert!(!body.allowed);
        assert_eq!(body.reason, "no_permission");

        let response = app
            .post(&format!("/api/v1/rbac/users/{}/roles", user.id))
            .authorization_bearer(&admin)
            .json(&json!({ "role_id": role.id }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Role assigned");

        let body: CheckPermissionResponse = app.post("/api/v1/rbac/check").authorization_bearer(&token).json(&check).await.json();
        assert!(body.allowed);
        assert_eq!(body.reason, "role_permission");

        let other = json!({ "action": "produce", "resource_level": "topic", "resource_path": "acme/dev/orders-eu" });
        let body: CheckPermissionResponse = app.post("/api/v1/rbac/check").authorization_bearer(&token).json(&other).await.json();
        assert!(!body.allowed);

        let body: UserPermissionsResponse = app.get("/api/v1/rbac/my-permissions").authorization_bearer(&token).await.json();
        assert_eq!(body.permissions.len(), 1);
        assert_eq!(body.permissions[0].source, "orders-producers");

        let response = app
            .delete(&format!("/api/v1/rbac/users/{}/roles/{}", user.id, role.id))
            .authorization_bearer(&admin)
            .await;
        response.assert_status_ok();

        let response = app
            .delete(&format!("/api/v1/rbac/users/{}/roles/{}", user.id, role.id))
            .authorization_bearer(&admin)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": "User does not have this role" }));
    }

    #[test_log::test(tokio::test)]
    async fn test_list_role_users() {
        let state = create_test_state().await;
        let admin = admin_token(&state).await;
        let user = create_test_user(&state, "dev@example.com").await;
        let token = bearer_token(&state, user.id).await;
        assign_system_role(&state, user.id, "viewer").await;
        let env = state.store.get_active_environment().await.unwrap().unwrap();
        let viewer = state.store.get_role_by_name(env.id, "viewer").await.unwrap().unwrap();
        let app = create_test_app(state);

        let path = format!("/api/v1/rbac/roles/{}/users", viewer.id);
        app.get(&path).authorization_bearer(&token).await.assert_status(StatusCode::FORBIDDEN);

        let response = app.get(&path).authorization_bearer(&admin).await;
        response.assert_status_ok();
        let body: RoleMembersResponse = response.json();
        assert_eq!(body.role_id, viewer.id);
        assert_eq!(body.users.len(), 1);
        assert_eq!(body.users[0].user_id, user.id);

        let missing = uuid::Uuid::new_v4();
        let response = app
            .get(&format!("/api/v1/rbac/roles/{missing}/users"))
            .authorization_bearer(&admin)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "detail": format!("Role with ID {missing} not found") }));
    }

    #[test_log::test(tokio::test)]
    async fn test_global_admin_check_reason() {
        let state = create_test_state().await;
        let token = admin_token(&state).await;
        let app = create_test_app(state);

        let body: CheckPermissionResponse = app
            .post("/api/v1/rbac/check")
            .authorization_bearer(&token)
            .json(&json!({ "action": "admin", "resource_level": "cluster" }))
            .await
            .json();
        assert!(body.allowed);
        assert_eq!(body.reason, "global_admin");
    }

    #[test_log::test(tokio::test)]
    async fn test_set_user_roles_and_list_users() {
        let state = create_test_state().await;
        let admin = admin_token(&state).await;
        let user = create_test_user(&state, "dev@example.com").await;
        let env = state.store.get_active_environment().await.unwrap().unwrap();
        let viewer = state.store.get_role_by_name(env.id, "viewer").await.unwrap().unwrap();
        let developer = state.store.get_role_by_name(env.id, "developer").await.unwrap().unwrap();
        let user_token = bearer_token(&state, user.id).await;
        let app = create_test_app(state);

        let response = app
            .put(&format!("/api/v1/rbac/users/{}/roles", user.id))
            .authorization_bearer(&admin)
            .json(&json!({ "role_ids": [viewer.id, developer.id, viewer.id] }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Roles updated");

        let body: UsersResponse = app.get("/api/v1/rbac/users?limit=10").authorization_bearer(&admin).await.json();
        let dev = body.users.iter().find(|u| u.id == user.id).unwrap();
        let mut roles: Vec<_> = dev.roles.iter().map(|r| r.role_name.as_str()).collect();
        roles.sort_unstable();
        assert_eq!(roles, vec!["developer", "viewer"]);

        let body: UserPermissionsResponse = app
            .get(&format!("/api/v1/rbac/users/{}/permissions", user.id))
            .authorization_bearer(&admin)
            .await
            .json();
        assert!(body.permissions.iter().any(|p| p.source == "developer"));

        // Unknown roles leave existing assignments alone
        let response = app
            .put(&format!("/api/v1/rbac/users/{}/roles", user.id))
            .authorization_bearer(&admin)
            .json(&json!({ "role_ids": [uuid::Uuid::new_v4()] }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        app.get("/api/v1/rbac/users")
            .authorization_bearer(&user_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
