//! Database repository for role permission grants, and the permission resolution joins.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::role_permissions::{Grant, RolePermission, RolePermissionDetail, RolePermissionGrant},
    },
    types::{Action, EnvironmentId, PermissionId, ResourceLevel, RoleId, UserId, abbrev_uuid},
};

const ROLE_PERMISSION_COLUMNS: &str = "id, role_id, permission_id, resource_pattern, created_at";

pub struct RolePermissions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> RolePermissions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert a grant. Re-adding an identical grant returns the existing row.
    #[instrument(skip(self, grant), fields(role_id = %abbrev_uuid(&role_id), permission_id = %abbrev_uuid(&grant.permission_id)), err)]
    pub async fn add(&mut self, role_id: RoleId, grant: &RolePermissionGrant) -> Result<RolePermission> {
        let inserted = sqlx::query_as::<_, RolePermission>(&format!(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, resource_pattern)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT role_permissions_unique DO NOTHING
            RETURNING {ROLE_PERMISSION_COLUMNS}
            "#
        ))
        .bind(role_id)
        .bind(grant.permission_id)
        .bind(&grant.resource_pattern)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        let existing = sqlx::query_as::<_, RolePermission>(&format!(
            r#"
            SELECT {ROLE_PERMISSION_COLUMNS} FROM role_permissions
            WHERE role_id = $1 AND permission_id = $2 AND resource_pattern IS NOT DISTINCT FROM $3
            "#
        ))
        .bind(role_id)
        .bind(grant.permission_id)
        .bind(&grant.resource_pattern)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(existing)
    }

    /// Remove the grant matching `(role, permission, pattern)` exactly; a `None` pattern only
    /// removes the unscoped grant.
    #[instrument(skip(self, resource_pattern), fields(role_id = %abbrev_uuid(&role_id), permission_id = %abbrev_uuid(&permission_id)), err)]
    pub async fn remove(&mut self, role_id: RoleId, permission_id: PermissionId, resource_pattern: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2 AND resource_pattern IS NOT DISTINCT FROM $3",
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(resource_pattern)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn clear_for_role(&mut self, role_id: RoleId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn list_for_role(&mut self, role_id: RoleId) -> Result<Vec<RolePermissionDetail>> {
        let details = sqlx::query_as::<_, RolePermissionDetail>(
            r#"
            SELECT rp.id, rp.role_id, rp.permission_id, p.action, p.resource_level, rp.resource_pattern, p.description
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.action, p.resource_level, rp.resource_pattern NULLS FIRST
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(details)
    }

    /// Every grant of `(action, level)` the user holds in the environment, through any role.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn grants_for(
        &mut self,
        user_id: UserId,
        environment_id: EnvironmentId,
        action: Action,
        resource_level: ResourceLevel,
    ) -> Result<Vec<Grant>> {
        let grants = sqlx::query_as::<_, Grant>(
            r#"
            SELECT p.action, p.resource_level, rp.resource_pattern, r.name AS role_name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            JOIN role_permissions rp ON rp.role_id = r.id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1 AND r.environment_id = $2 AND p.action = $3 AND p.resource_level = $4
            "#,
        )
        .bind(user_id)
        .bind(environment_id)
        .bind(action)
        .bind(resource_level)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(grants)
    }

    /// The user's full effective permission set in the environment, annotated by role.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn effective_for(&mut self, user_id: UserId, environment_id: EnvironmentId) -> Result<Vec<Grant>> {
        let grants = sqlx::query_as::<_, Grant>(
            r#"
            SELECT p.action, p.resource_level, rp.resource_pattern, r.name AS role_name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            JOIN role_permissions rp ON rp.role_id = r.id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1 AND r.environment_id = $2
            ORDER BY r.name, p.action, p.resource_level
            "#,
        )
        .bind(user_id)
        .bind(environment_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(grants)
    }
}
