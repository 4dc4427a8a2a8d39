//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is served under `/api/v1`:
//!
//! - **RBAC** (`/rbac/*`): permissions, roles, role assignment and permission checks
//! - **Tokens** (`/tokens/*`): API tokens, token administration and cluster tokens
//! - **Sessions** (`/auth/*`): refresh, logout and session management
//! - **Environments** (`/environments/*`): managed clusters and the active environment
//!
//! Errors are returned as `{"detail": "..."}` with the status code of the underlying
//! [`crate::errors::Error`].
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The document is served at
//! `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
