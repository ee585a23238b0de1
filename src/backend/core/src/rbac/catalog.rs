//! Permission catalog validation.
//!
//! Role management refers to permissions by descriptor strings of the form
//! `resource:action:scope`. The catalog parses them, checks the action and
//! scope vocabularies, and resolves them to stored catalog records.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::models::{Permission, PermissionAction, PermissionId, Scope};
use crate::db::{PermissionStore, StoreError};

/// Descriptor and lookup failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid permission format. Expected 'resource:action:scope', got: {0}")]
    InvalidFormat(String),

    #[error("invalid action: {0}. Valid actions are: read, write, create, update, delete")]
    InvalidAction(String),

    #[error("invalid scope: {0}. Valid scopes are: global, organization, self")]
    InvalidScope(String),

    #[error("permission does not exist: {0}")]
    NotFound(String),

    #[error("error checking permission existence: {0}")]
    Store(#[from] StoreError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Descriptor
// ═══════════════════════════════════════════════════════════════════════════════

/// A parsed `resource:action:scope` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionDescriptor {
    pub resource: String,
    pub action: PermissionAction,
    pub scope: Scope,
}

impl fmt::Display for PermissionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.scope)
    }
}

/// Parse a descriptor without consulting the catalog.
///
/// Exactly three `:`-separated parts are required and the resource must be
/// non-empty. Action and scope are matched exactly.
pub fn parse_descriptor(descriptor: &str) -> Result<PermissionDescriptor, CatalogError> {
    let parts: Vec<&str> = descriptor.split(':').collect();
    let [resource, action, scope] = parts.as_slice() else {
        return Err(CatalogError::InvalidFormat(descriptor.to_string()));
    };
    if resource.is_empty() {
        return Err(CatalogError::InvalidFormat(descriptor.to_string()));
    }

    let action =
        PermissionAction::parse(action).ok_or_else(|| CatalogError::InvalidAction(action.to_string()))?;
    let scope = Scope::parse(scope).ok_or_else(|| CatalogError::InvalidScope(scope.to_string()))?;

    Ok(PermissionDescriptor {
        resource: resource.to_string(),
        action,
        scope,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

/// Validator over the stored permission catalog.
#[derive(Clone)]
pub struct PermissionCatalog {
    store: Arc<dyn PermissionStore>,
}

impl PermissionCatalog {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Parse a descriptor and return its catalog record.
    pub async fn validate(&self, descriptor: &str) -> Result<Permission, CatalogError> {
        let parsed = parse_descriptor(descriptor)?;

        let permission = self
            .store
            .find_by_descriptor(&parsed.resource, parsed.action.as_str(), parsed.scope)
            .await?
            .ok_or_else(|| CatalogError::NotFound(descriptor.to_string()))?;

        debug!(descriptor, permission_id = %permission.id, "Descriptor validated");
        Ok(permission)
    }

    /// Validate a batch; the first invalid entry aborts the whole batch.
    pub async fn validate_all<S: AsRef<str>>(&self, descriptors: &[S]) -> Result<Vec<Permission>, CatalogError> {
        let mut permissions = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            permissions.push(self.validate(descriptor.as_ref()).await?);
        }
        Ok(permissions)
    }

    /// Validate a batch and return the catalog ids, in input order.
    pub async fn to_ids<S: AsRef<str>>(&self, descriptors: &[S]) -> Result<Vec<PermissionId>, CatalogError> {
        Ok(self
            .validate_all(descriptors)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }

    /// Every catalog record.
    pub async fn available(&self) -> Result<Vec<Permission>, CatalogError> {
        Ok(self.store.list_permissions().await?)
    }

    pub async fn by_resource(&self, resource: &str) -> Result<Vec<Permission>, CatalogError> {
        Ok(self.store.list_permissions_by_resource(resource).await?)
    }

    /// Look up a record by id.
    pub async fn get(&self, id: PermissionId) -> Result<Option<Permission>, CatalogError> {
        Ok(self.store.find_permission(id).await?)
    }

    pub fn valid_actions() -> &'static [PermissionAction] {
        &PermissionAction::ALL
    }

    pub fn valid_scopes() -> &'static [Scope] {
        &Scope::ALL
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;

    fn catalog_with(perms: Vec<Permission>) -> PermissionCatalog {
        let store = Arc::new(InMemoryStore::new());
        for p in perms {
            store.put_permission(p);
        }
        PermissionCatalog::new(store)
    }

    #[test]
    fn test_parse_descriptor() {
        let d = parse_descriptor("users:read:organization").unwrap();
        assert_eq!(d.resource, "users");
        assert_eq!(d.action, PermissionAction::Read);
        assert_eq!(d.scope, Scope::Organization);
        assert_eq!(d.to_string(), "users:read:organization");
    }

    #[test]
    fn test_parse_descriptor_format_errors() {
        for bad in ["users:read", "users:read:self:extra", "", ":read:self"] {
            let err = parse_descriptor(bad).unwrap_err();
            assert!(matches!(err, CatalogError::InvalidFormat(_)), "{bad}");
        }
    }

    #[test]
    fn test_parse_descriptor_names_invalid_token() {
        let err = parse_descriptor("users:list:self").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid action: list. Valid actions are: read, write, create, update, delete"
        );

        let err = parse_descriptor("users:read:tenant").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid scope: tenant. Valid scopes are: global, organization, self"
        );
    }

    #[test]
    fn test_valid_vocabularies() {
        let actions: Vec<&str> = PermissionCatalog::valid_actions().iter().map(|a| a.as_str()).collect();
        assert_eq!(actions, ["read", "write", "create", "update", "delete"]);

        let scopes: Vec<&str> = PermissionCatalog::valid_scopes().iter().map(|s| s.as_str()).collect();
        assert_eq!(scopes, ["global", "organization", "self"]);
    }

    #[tokio::test]
    async fn test_validate_looks_up_triple() {
        let catalog = catalog_with(vec![
            Permission::new("users", "read").with_scope(Scope::Organization),
        ]);

        assert!(catalog.validate("users:read:organization").await.is_ok());

        let err = catalog.validate("users:read:global").await.unwrap_err();
        assert_eq!(err.to_string(), "permission does not exist: users:read:global");
    }

    #[tokio::test]
    async fn test_validate_all_is_all_or_nothing() {
        let catalog = catalog_with(vec![
            Permission::new("users", "read").with_scope(Scope::Organization),
            Permission::new("roles", "create").with_scope(Scope::Organization),
        ]);

        let ok = catalog
            .validate_all(&["users:read:organization", "roles:create:organization"])
            .await
            .unwrap();
        assert_eq!(ok.len(), 2);

        let err = catalog
            .validate_all(&["users:read:organization", "users:bogus:self", "nope"])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidAction(ref a) if a == "bogus"));
    }

    #[tokio::test]
    async fn test_descriptor_id_round_trip() {
        let catalog = catalog_with(vec![
            Permission::new("locations", "delete").with_scope(Scope::Global),
            Permission::new("users", "update").with_scope(Scope::Personal),
        ]);

        let ids = catalog
            .to_ids(&["users:update:self", "locations:delete:global"])
            .await
            .unwrap();

        let first = catalog.get(ids[0]).await.unwrap().unwrap();
        assert_eq!((first.resource.as_str(), first.action.as_str()), ("users", "update"));
        let second = catalog.get(ids[1]).await.unwrap().unwrap();
        assert_eq!((second.resource.as_str(), second.action.as_str()), ("locations", "delete"));
    }

    #[tokio::test]
    async fn test_listing() {
        let catalog = catalog_with(vec![
            Permission::new("users", "update").with_scope(Scope::Personal),
            Permission::new("users", "read").with_scope(Scope::Personal),
            Permission::new("roles", "read").with_scope(Scope::Global),
        ]);

        let all = catalog.available().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].resource, "roles");

        let users: Vec<String> = catalog
            .by_resource("users")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.action)
            .collect();
        assert_eq!(users, ["read", "update"]);
    }
}
