//! Database layer for data persistence and access.
//!
//! This module implements the PostgreSQL side of the store using SQLx, following the Repository
//! pattern:
//!
//! ```text
//! ┌─────────────┐
//! │   Store     │  (crate::store::PostgresStore - transactions)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Transactions
//!
//! Repositories borrow a `&mut PgConnection`, so the same code runs on a pooled connection or
//! inside a transaction. Every multi-row mutation is issued from a transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut grants = RolePermissions::new(&mut tx);
//! grants.clear_for_role(role_id).await?;
//! for grant in &new_grants {
//!     grants.add(role_id, grant).await?;
//! }
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are applied at startup through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
