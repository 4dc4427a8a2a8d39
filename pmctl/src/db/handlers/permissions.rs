//! Database repository for the seeded permission definitions (read-only).

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{errors::Result, models::permissions::Permission},
    types::{Action, PermissionId, ResourceLevel},
};

const PERMISSION_COLUMNS: &str = "id, action, resource_level, description, created_at";

pub struct Permissions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Permissions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY action, resource_level"
        ))
        .fetch_all(&mut *self.db)
        .await?;

        Ok(permissions)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: PermissionId) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(permission)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_action_and_level(&mut self, action: Action, resource_level: ResourceLevel) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE action = $1 AND resource_level = $2"
        ))
        .bind(action)
        .bind(resource_level)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(permission)
    }
}
