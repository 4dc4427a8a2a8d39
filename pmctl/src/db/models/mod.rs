//! Database record models matching table schemas.
//!
//! These structs correspond to table rows (or fixed joins over them) and derive
//! `sqlx::FromRow`. They are distinct from the API models in [`crate::api::models`] so storage and
//! wire representations can evolve independently.
//!
//! # Model Categories
//!
//! ## Identity
//!
//! - [`users`]: console users, including the global-admin break-glass flag
//! - [`environments`]: managed clusters, with their encrypted secrets and the active flag
//!
//! ## Authorization
//!
//! - [`permissions`]: seeded `(action, resource_level)` definitions
//! - [`roles`]: environment-scoped roles, system or custom
//! - [`role_permissions`]: grants of permissions to roles, optionally pattern-scoped
//! - [`user_roles`]: role assignments
//!
//! ## Credentials
//!
//! - [`sessions`]: interactive sessions (token digests and encrypted refresh tokens)
//! - [`api_tokens`]: long-lived programmatic tokens (digests only)
//! - [`oidc_providers`]: external identity providers per environment, and pending logins

pub mod api_tokens;
pub mod environments;
pub mod oidc_providers;
pub mod permissions;
pub mod role_permissions;
pub mod roles;
pub mod sessions;
pub mod user_roles;
pub mod users;
