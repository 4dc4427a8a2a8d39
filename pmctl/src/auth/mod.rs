//! Authentication building blocks.
//!
//! - [`pattern`]: the resource pattern language used to scope role grants
//! - [`tokens`]: signed session tokens and downstream cluster tokens
//! - [`current_user`]: extractors resolving the caller from a bearer token, API token header or
//!   session cookie
//! - [`middleware`]: route-level permission enforcement
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use pmctl::auth::current_user::{CurrentSuperuser, CurrentUser};
//!
//! async fn whoami(user: CurrentUser) -> String {
//!     user.email
//! }
//!
//! async fn admin_only(CurrentSuperuser(admin): CurrentSuperuser) -> String {
//!     format!("hello {}", admin.email)
//! }
//! ```

pub mod current_user;
pub mod middleware;
pub mod pattern;
pub mod tokens;
