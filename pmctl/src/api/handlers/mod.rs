//! HTTP request handlers for all API endpoints.
//!
//! Handlers authenticate through the [`CurrentUser`](crate::auth::current_user::CurrentUser) and
//! [`CurrentSuperuser`](crate::auth::current_user::CurrentSuperuser) extractors and delegate to the
//! services on [`AppState`](crate::AppState).
//!
//! - [`auth`]: session refresh, logout and session management
//! - [`environments`]: environment administration
//! - [`oidc`]: per-environment OIDC providers and the public login endpoints
//! - [`rbac`]: roles, permissions, assignments and checks
//! - [`tokens`]: API tokens and cluster tokens

pub mod auth;
pub mod environments;
pub mod oidc;
pub mod rbac;
pub mod tokens;
