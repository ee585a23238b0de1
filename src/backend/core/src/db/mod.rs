//! Storage collaborators for the authorization layer.
//!
//! The resolver, catalog and role service only see the traits below. Two
//! implementations ship with the crate:
//! - [`InMemoryStore`]: dashmap-backed, used by tests, benches and the server
//!   when no database URL is configured
//! - [`PgStore`]: PostgreSQL via sqlx

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::rbac::filter::ScopeFilter;
use crate::rbac::models::{Permission, PermissionId, Role, RoleId, Scope, User, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        table: &'static str,
        id: String,
        reason: String,
    },

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("{0} not found")]
    Missing(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Read access to user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by id. Soft-deleted users are returned as stored.
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;
}

/// Role records.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>>;

    /// Look up a non-deleted role by exact name.
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Non-deleted roles visible through `filter`, oldest first.
    ///
    /// The filter's owner is matched against `created_by`.
    async fn list_roles(&self, filter: &ScopeFilter) -> StoreResult<Vec<Role>>;

    /// Insert a new role. Fails with [`StoreError::Duplicate`] when a
    /// non-deleted role with the same name exists.
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;

    /// Replace an existing role.
    async fn update_role(&self, role: &Role) -> StoreResult<()>;
}

/// Read access to the permission catalog.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>>;

    /// Look up the catalog record for a `resource:action:scope` triple.
    async fn find_by_descriptor(
        &self,
        resource: &str,
        action: &str,
        scope: Scope,
    ) -> StoreResult<Option<Permission>>;

    /// All catalog records ordered by resource then action.
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;

    async fn list_permissions_by_resource(&self, resource: &str) -> StoreResult<Vec<Permission>>;
}
