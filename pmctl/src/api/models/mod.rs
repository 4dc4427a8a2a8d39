//! API request and response data models.
//!
//! API models are distinct from the database models in [`crate::db::models`]; conversions live
//! next to the API type as `From` impls. Secrets (token values, token hashes, encrypted refresh
//! tokens, cluster signing keys) never appear in a response model, except a token value returned
//! once at creation.
//!
//! - [`rbac`]: permissions, roles, assignments and permission checks
//! - [`tokens`]: API token and cluster token payloads
//! - [`sessions`]: token pairs, session listings and the session cookie
//! - [`environments`]: environment records
//! - [`oidc`]: OIDC provider settings and the login exchange

pub mod environments;
pub mod oidc;
pub mod rbac;
pub mod sessions;
pub mod tokens;
