//! Role-based access control.
//!
//! [`RbacService`] answers "may user U perform action A on resource R in environment E" and
//! manages the roles, grants and assignments behind that answer. [`seed`] holds the permission
//! catalogue and the system roles every environment starts with.

use thiserror::Error;

use crate::store::StoreError;

pub mod seed;
pub mod service;

pub use service::{Decision, EffectivePermission, RbacService, RoleWithPermissions, UserWithRoles};

#[derive(Debug, Error)]
pub enum RbacError {
    /// Rejected input, e.g. a duplicate role name or an unparsable resource pattern
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RbacError>;
