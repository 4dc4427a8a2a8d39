//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `&mut PgConnection` (pooled connection or open transaction)
//! and returns records from [`crate::db::models`]. [`Roles`] and [`Environments`] implement the
//! generic [`Repository`] CRUD trait; the others expose the narrower, entity-specific operations
//! their tables need.
//!
//! # Available Repositories
//!
//! - [`Users`]: console users
//! - [`Environments`]: managed clusters and the active-environment switch
//! - [`Permissions`]: seeded permission definitions (read-only)
//! - [`Roles`]: environment-scoped roles
//! - [`RolePermissions`]: grants, plus the permission resolution joins
//! - [`UserRoles`]: role assignments
//! - [`Sessions`]: interactive sessions
//! - [`ApiTokens`]: console API tokens
//! - [`OidcProviders`]: external identity providers and pending logins

pub mod api_tokens;
pub mod environments;
pub mod oidc_providers;
pub mod permissions;
pub mod repository;
pub mod role_permissions;
pub mod roles;
pub mod sessions;
pub mod user_roles;
pub mod users;

pub use api_tokens::ApiTokens;
pub use environments::Environments;
pub use oidc_providers::OidcProviders;
pub use permissions::Permissions;
pub use repository::Repository;
pub use role_permissions::RolePermissions;
pub use roles::Roles;
pub use sessions::Sessions;
pub use user_roles::UserRoles;
pub use users::Users;
