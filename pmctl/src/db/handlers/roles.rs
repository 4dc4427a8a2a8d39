//! Database repository for roles.

use std::collections::HashMap;

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::roles::{RoleCreateDBRequest, RoleDBResponse, RoleFilter, RoleUpdateDBRequest},
    },
    types::{EnvironmentId, RoleId, abbrev_uuid},
};

const ROLE_COLUMNS: &str = "id, environment_id, name, description, is_system, created_at, updated_at";

pub struct Roles<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Roles<'c> {
    type CreateRequest = RoleCreateDBRequest;
    type UpdateRequest = RoleUpdateDBRequest;
    type Response = RoleDBResponse;
    type Id = RoleId;
    type Filter = RoleFilter;

    #[instrument(skip(self, request), fields(name = %request.name, environment_id = %abbrev_uuid(&request.environment_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!(
            "INSERT INTO roles (environment_id, name, description, is_system) VALUES ($1, $2, $3, $4) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(request.environment_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.is_system)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(role)
    }

    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(role)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let roles = sqlx::query_as::<_, RoleDBResponse>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(roles.into_iter().map(|r| (r.id, r)).collect())
    }

    #[instrument(skip(self, filter), fields(environment_id = %abbrev_uuid(&filter.environment_id), include_system = filter.include_system), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let roles = sqlx::query_as::<_, RoleDBResponse>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE environment_id = $1 AND ($2 OR NOT is_system) ORDER BY is_system DESC, name"
        ))
        .bind(filter.environment_id)
        .bind(filter.include_system)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(roles)
    }

    /// Deletes only non-system roles; a system role reports `false` exactly like a missing one.
    #[instrument(skip(self), fields(role_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1 AND NOT is_system")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(role_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(role)
    }
}

impl<'c> Roles<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, name), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
    pub async fn get_by_name(&mut self, environment_id: EnvironmentId, name: &str) -> Result<Option<RoleDBResponse>> {
        let role = sqlx::query_as::<_, RoleDBResponse>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE environment_id = $1 AND name = $2"
        ))
        .bind(environment_id)
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(role)
    }
}
