//! Environment administration. One environment per managed cluster; exactly one is active and
//! every RBAC decision is made against it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::info;

use crate::{
    AppState,
    api::models::environments::{EnvironmentCreate, EnvironmentResponse, EnvironmentsResponse, RbacToggle},
    auth::current_user::CurrentSuperuser,
    db::models::environments::{EnvironmentCreateDBRequest, EnvironmentUpdateDBRequest},
    errors::{Error, Result},
    rbac::seed::seed_system_roles,
    types::{EnvironmentId, abbrev_uuid},
};

fn environment_not_found(id: EnvironmentId) -> Error {
    Error::NotFound {
        resource: "Environment".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/environments",
    tag = "environments",
    summary = "List environments",
    responses(
        (status = 200, description = "Environments", body = EnvironmentsResponse),
        (status = 403, description = "Superuser required"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn list_environments(
    State(state): State<AppState>,
    CurrentSuperuser(_admin): CurrentSuperuser,
) -> Result<Json<EnvironmentsResponse>> {
    let environments = state.store.list_environments().await?;
    Ok(Json(EnvironmentsResponse {
        environments: environments.into_iter().map(Into::into).collect(),
    }))
}

/// Create an environment with the system roles seeded. It starts inactive unless no environment
/// is active yet.
#[utoipa::path(
    post,
    path = "/environments",
    tag = "environments",
    summary = "Create environment",
    request_body = EnvironmentCreate,
    responses(
        (status = 201, description = "Environment created", body = EnvironmentResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Superuser required"),
        (status = 409, description = "Name already taken"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn create_environment(
    State(state): State<AppState>,
    CurrentSuperuser(admin): CurrentSuperuser,
    Json(data): Json<EnvironmentCreate>,
) -> Result<(StatusCode, Json<EnvironmentResponse>)> {
    let name = data.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Environment name cannot be empty".to_string(),
        });
    }
    let admin_url = url::Url::parse(data.admin_url.trim()).map_err(|e| Error::BadRequest {
        message: format!("Invalid admin URL: {e}"),
    })?;

    let mut environment = state
        .store
        .create_environment(&EnvironmentCreateDBRequest {
            name: name.to_string(),
            admin_url: admin_url.to_string(),
            rbac_enabled: data.rbac_enabled,
        })
        .await?;
    seed_system_roles(state.store.as_ref(), environment.id).await?;

    if state.store.get_active_environment().await?.is_none() {
        environment = state
            .store
            .activate_environment(environment.id)
            .await?
            .ok_or_else(|| environment_not_found(environment.id))?;
    }

    info!(
        environment_id = %abbrev_uuid(&environment.id),
        name = %environment.name,
        created_by = %abbrev_uuid(&admin.id),
        "Created environment"
    );
    Ok((StatusCode::CREATED, Json(environment.into())))
}

#[utoipa::path(
    post,
    path = "/environments/{environment_id}/activate",
    tag = "environments",
    summary = "Activate environment",
    description = "Make this the active environment; every other environment is deactivated in the same step",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Environment activated", body = EnvironmentResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Environment not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn activate_environment(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(admin): CurrentSuperuser,
) -> Result<Json<EnvironmentResponse>> {
    let environment = state
        .store
        .activate_environment(environment_id)
        .await?
        .ok_or_else(|| environment_not_found(environment_id))?;

    info!(
        environment_id = %abbrev_uuid(&environment.id),
        name = %environment.name,
        activated_by = %abbrev_uuid(&admin.id),
        "Switched active environment"
    );
    Ok(Json(environment.into()))
}

#[utoipa::path(
    put,
    path = "/environments/{environment_id}/rbac",
    tag = "environments",
    summary = "Toggle RBAC",
    description = "Switch route-level permission enforcement on or off for the environment",
    params(("environment_id" = uuid::Uuid, Path, description = "Environment ID")),
    request_body = RbacToggle,
    responses(
        (status = 200, description = "Environment updated", body = EnvironmentResponse),
        (status = 403, description = "Superuser required"),
        (status = 404, description = "Environment not found"),
    ),
    security(("BearerAuth" = []), ("ApiToken" = []))
)]
pub async fn set_environment_rbac(
    State(state): State<AppState>,
    Path(environment_id): Path<EnvironmentId>,
    CurrentSuperuser(admin): CurrentSuperuser,
    Json(data): Json<RbacToggle>,
) -> Result<Json<EnvironmentResponse>> {
    let environment = state
        .store
        .update_environment(
            environment_id,
            &EnvironmentUpdateDBRequest {
                rbac_enabled: Some(data.enabled),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| environment_not_found(environment_id))?;

    tracing::warn!(
        environment = %environment.name,
        rbac_enabled = environment.rbac_enabled,
        changed_by = %abbrev_uuid(&admin.id),
        "RBAC enforcement toggled"
    );
    Ok(Json(environment.into()))
}
