//! Seed data for the permission model.
//!
//! The permission catalogue is inserted by migration; [`PERMISSION_DEFINITIONS`] mirrors it for
//! the in-memory store and for tests. System roles are per environment and are created by
//! [`seed_system_roles`] whenever an environment is created or found without them.

use tracing::{info, instrument};

use crate::{
    db::models::{role_permissions::RolePermissionGrant, roles::RoleCreateDBRequest},
    store::{AuthStore, StoreError, StoreResult},
    types::{Action, EnvironmentId, ResourceLevel, abbrev_uuid},
};

pub const PERMISSION_DEFINITIONS: [(Action, ResourceLevel, &str); 17] = [
    (Action::Produce, ResourceLevel::Topic, "Publish messages to a topic"),
    (Action::Consume, ResourceLevel::Topic, "Consume messages from a topic"),
    (Action::Functions, ResourceLevel::Namespace, "Manage Pulsar Functions in a namespace"),
    (Action::Sources, ResourceLevel::Namespace, "Manage Pulsar IO sources in a namespace"),
    (Action::Sinks, ResourceLevel::Namespace, "Manage Pulsar IO sinks in a namespace"),
    (Action::Packages, ResourceLevel::Namespace, "Manage packages in a namespace"),
    (Action::Admin, ResourceLevel::Cluster, "Full administrative access to the cluster"),
    (Action::Read, ResourceLevel::Cluster, "Read cluster configuration and status"),
    (Action::Admin, ResourceLevel::Tenant, "Full administrative access to a tenant"),
    (Action::Read, ResourceLevel::Tenant, "Read tenant configuration and metadata"),
    (Action::Write, ResourceLevel::Tenant, "Create and modify tenant resources"),
    (Action::Admin, ResourceLevel::Namespace, "Full administrative access to a namespace"),
    (Action::Read, ResourceLevel::Namespace, "Read namespace configuration and topics"),
    (Action::Write, ResourceLevel::Namespace, "Create and modify namespace resources"),
    (Action::Admin, ResourceLevel::Topic, "Full administrative access to a topic"),
    (Action::Read, ResourceLevel::Topic, "Read topic metadata and statistics"),
    (Action::Write, ResourceLevel::Topic, "Modify topic configuration"),
];

/// Name of the system role that unlocks superuser-only endpoints.
pub const SUPERUSER_ROLE: &str = "superuser";

pub struct SystemRole {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: &'static [(Action, ResourceLevel)],
}

const READ_ALL: [(Action, ResourceLevel); 4] = [
    (Action::Read, ResourceLevel::Cluster),
    (Action::Read, ResourceLevel::Tenant),
    (Action::Read, ResourceLevel::Namespace),
    (Action::Read, ResourceLevel::Topic),
];

pub const SYSTEM_ROLES: [SystemRole; 5] = [
    SystemRole {
        name: SUPERUSER_ROLE,
        description: "Full administrative access to everything",
        permissions: &[(Action::Admin, ResourceLevel::Cluster)],
    },
    SystemRole {
        name: "admin",
        description: "Tenant and namespace administration",
        permissions: &[(Action::Admin, ResourceLevel::Tenant), (Action::Admin, ResourceLevel::Namespace)],
    },
    SystemRole {
        name: "operator",
        description: "Day-to-day operations: read all, manage topics and messages",
        permissions: &[
            READ_ALL[0],
            READ_ALL[1],
            READ_ALL[2],
            READ_ALL[3],
            (Action::Write, ResourceLevel::Topic),
            (Action::Produce, ResourceLevel::Topic),
            (Action::Consume, ResourceLevel::Topic),
        ],
    },
    SystemRole {
        name: "developer",
        description: "Read access and message production/consumption",
        permissions: &[
            READ_ALL[0],
            READ_ALL[1],
            READ_ALL[2],
            READ_ALL[3],
            (Action::Produce, ResourceLevel::Topic),
            (Action::Consume, ResourceLevel::Topic),
        ],
    },
    SystemRole {
        name: "viewer",
        description: "Read-only access to all resources",
        permissions: &READ_ALL,
    },
];

/// Create any missing system role in `environment_id` with its default grants.
///
/// Existing roles are left untouched, including grants an administrator changed afterwards.
/// Returns the number of roles created.
#[instrument(skip(store), fields(environment_id = %abbrev_uuid(&environment_id)), err)]
pub async fn seed_system_roles(store: &dyn AuthStore, environment_id: EnvironmentId) -> StoreResult<usize> {
    let mut created = 0;
    for system_role in &SYSTEM_ROLES {
        if store.get_role_by_name(environment_id, system_role.name).await?.is_some() {
            continue;
        }

        let role = match store
            .create_role(&RoleCreateDBRequest {
                environment_id,
                name: system_role.name.to_string(),
                description: Some(system_role.description.to_string()),
                is_system: true,
            })
            .await
        {
            Ok(role) => role,
            // Seeded concurrently by another instance
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        };

        let mut grants = Vec::with_capacity(system_role.permissions.len());
        for (action, resource_level) in system_role.permissions {
            let permission = store
                .get_permission_by_action_and_level(*action, *resource_level)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "Permission",
                    id: format!("{action}:{resource_level}"),
                })?;
            grants.push(RolePermissionGrant {
                permission_id: permission.id,
                resource_pattern: None,
            });
        }
        store.replace_role_permissions(role.id, &grants).await?;
        created += 1;
    }

    if created > 0 {
        info!(created, "Seeded system roles");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::environments::EnvironmentCreateDBRequest, store::MemoryStore};

    #[test]
    fn test_permission_definitions_are_unique() {
        let mut keys: Vec<_> = PERMISSION_DEFINITIONS.iter().map(|(a, l, _)| (*a, *l)).collect();
        keys.sort_by_key(|(a, l)| (a.as_str(), l.as_str()));
        keys.dedup();
        assert_eq!(keys.len(), PERMISSION_DEFINITIONS.len());
    }

    #[test]
    fn test_system_roles_only_reference_defined_permissions() {
        for role in &SYSTEM_ROLES {
            for (action, level) in role.permissions {
                assert!(
                    PERMISSION_DEFINITIONS.iter().any(|(a, l, _)| a == action && l == level),
                    "{} references undefined {action}:{level}",
                    role.name
                );
            }
        }
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store = MemoryStore::new();
        let env = store
            .create_environment(&EnvironmentCreateDBRequest {
                name: "local".to_string(),
                admin_url: "http://localhost:8080".to_string(),
                rbac_enabled: true,
            })
            .await
            .unwrap();

        assert_eq!(seed_system_roles(&store, env.id).await.unwrap(), 5);
        assert_eq!(seed_system_roles(&store, env.id).await.unwrap(), 0);

        let roles = store.list_roles(env.id, true).await.unwrap();
        assert_eq!(roles.len(), 5);
        assert!(roles.iter().all(|r| r.is_system));

        let operator = store.get_role_by_name(env.id, "operator").await.unwrap().unwrap();
        let grants = store.role_permissions(operator.id).await.unwrap();
        assert_eq!(grants.len(), 7);
        assert!(grants.iter().all(|g| g.resource_pattern.is_none()));
    }
}
