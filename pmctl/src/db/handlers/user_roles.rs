//! Database repository for user role assignments.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::user_roles::{UserRole, UserRoleDetail},
    },
    types::{EnvironmentId, RoleId, UserId, abbrev_uuid},
};

const DETAIL_QUERY: &str = r#"
    SELECT ur.user_id, ur.role_id, r.name AS role_name, r.is_system, r.environment_id, ur.assigned_by, ur.assigned_at
    FROM user_roles ur
    JOIN roles r ON r.id = ur.role_id
"#;

pub struct UserRoles<'c> {
    db: &'c mut PgConnection,
}

impl<'c> UserRoles<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Assign a role. Re-assigning keeps the original assignment record.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn assign(&mut self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> Result<UserRole> {
        let assignment = sqlx::query_as::<_, UserRole>(
            r#"
            INSERT INTO user_roles (user_id, role_id, assigned_by)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT user_roles_unique DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING id, user_id, role_id, assigned_by, assigned_at
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(assigned_by)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(assignment)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn remove(&mut self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every assignment the user holds in one environment, leaving other environments intact.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn clear_for_user_in_environment(&mut self, user_id: UserId, environment_id: EnvironmentId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM user_roles ur USING roles r WHERE ur.role_id = r.id AND ur.user_id = $1 AND r.environment_id = $2",
        )
        .bind(user_id)
        .bind(environment_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId, environment_id: Option<EnvironmentId>) -> Result<Vec<UserRoleDetail>> {
        let roles = sqlx::query_as::<_, UserRoleDetail>(&format!(
            "{DETAIL_QUERY} WHERE ur.user_id = $1 AND ($2::uuid IS NULL OR r.environment_id = $2) ORDER BY r.name"
        ))
        .bind(user_id)
        .bind(environment_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(roles)
    }

    /// Assignments for many users at once, within one environment.
    #[instrument(skip(self, user_ids), fields(count = user_ids.len()), err)]
    pub async fn list_for_users(&mut self, user_ids: &[UserId], environment_id: EnvironmentId) -> Result<Vec<UserRoleDetail>> {
        let roles = sqlx::query_as::<_, UserRoleDetail>(&format!(
            "{DETAIL_QUERY} WHERE ur.user_id = ANY($1) AND r.environment_id = $2 ORDER BY r.name"
        ))
        .bind(user_ids)
        .bind(environment_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(roles)
    }

    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&role_id)), err)]
    pub async fn list_for_role(&mut self, role_id: RoleId) -> Result<Vec<UserRoleDetail>> {
        let roles = sqlx::query_as::<_, UserRoleDetail>(&format!("{DETAIL_QUERY} WHERE ur.role_id = $1 ORDER BY ur.assigned_at"))
            .bind(role_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(roles)
    }

    #[instrument(skip(self, role_name), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn has_system_role_any_environment(&mut self, user_id: UserId, role_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id WHERE ur.user_id = $1 AND r.name = $2 AND r.is_system)",
        )
        .bind(user_id)
        .bind(role_name)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(exists)
    }
}
