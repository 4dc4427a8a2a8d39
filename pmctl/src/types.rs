//! Common type definitions shared across the authorization and credential layers.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, RoleId, etc.)
//! - The closed vocabularies of the permission model: [`Action`] and [`ResourceLevel`]
//!
//! # Resource Levels
//!
//! Resource levels form a containment hierarchy over the Pulsar resource tree:
//!
//! ```text
//! cluster ⊇ tenant ⊇ namespace ⊇ topic
//! ```
//!
//! A permission is always an `(action, resource_level)` pair, e.g. `read:topic` or
//! `admin:cluster`.
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type EnvironmentId = Uuid;
pub type PermissionId = Uuid;
pub type RoleId = Uuid;
pub type RolePermissionId = Uuid;
pub type UserRoleId = Uuid;
pub type SessionId = Uuid;
pub type ApiTokenId = Uuid;
pub type OidcProviderId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// An operation a role can be granted on Pulsar resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Action {
    Produce,
    Consume,
    Functions,
    Sources,
    Sinks,
    Packages,
    Admin,
    Read,
    Write,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Produce,
        Action::Consume,
        Action::Functions,
        Action::Sources,
        Action::Sinks,
        Action::Packages,
        Action::Admin,
        Action::Read,
        Action::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Produce => "produce",
            Action::Consume => "consume",
            Action::Functions => "functions",
            Action::Sources => "sources",
            Action::Sinks => "sinks",
            Action::Packages => "packages",
            Action::Admin => "admin",
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("action", s))
    }
}

/// Granularity tier of a permission, ordered by containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ResourceLevel {
    Cluster,
    Tenant,
    Namespace,
    Topic,
}

impl ResourceLevel {
    pub const ALL: [ResourceLevel; 4] = [
        ResourceLevel::Cluster,
        ResourceLevel::Tenant,
        ResourceLevel::Namespace,
        ResourceLevel::Topic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLevel::Cluster => "cluster",
            ResourceLevel::Tenant => "tenant",
            ResourceLevel::Namespace => "namespace",
            ResourceLevel::Topic => "topic",
        }
    }

    /// True if resources at `self` contain resources at `other` (a level contains itself).
    pub fn contains(&self, other: ResourceLevel) -> bool {
        *self <= other
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("resource level", s))
    }
}

/// Returned when parsing an [`Action`] or [`ResourceLevel`] from an unknown string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_action_parse_and_display() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        let err = "delete".parse::<Action>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown action: 'delete'");
    }

    #[test]
    fn test_resource_level_containment() {
        assert!(ResourceLevel::Cluster.contains(ResourceLevel::Topic));
        assert!(ResourceLevel::Tenant.contains(ResourceLevel::Namespace));
        assert!(ResourceLevel::Topic.contains(ResourceLevel::Topic));
        assert!(!ResourceLevel::Topic.contains(ResourceLevel::Namespace));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ResourceLevel::Namespace).unwrap();
        assert_eq!(json, "\"namespace\"");
        let action: Action = serde_json::from_str("\"produce\"").unwrap();
        assert_eq!(action, Action::Produce);
    }
}
