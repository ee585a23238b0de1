//! Permission resolution and privilege checks.
//!
//! [`RbacService`] answers two questions on top of the stores:
//! "what may this caller do right now?" (resolution, run on every request)
//! and "may this caller hand out these permissions?" (escalation checks).

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::context::AuthorizationContext;
use super::filter::ScopeFilter;
use super::models::{GrantedPermission, PermissionId, RoleId, Scope, UserId};
use crate::db::{PermissionStore, RoleStore, StoreError, UserStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures resolving a caller's permissions.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("user {user_id} references invalid role id {role_id:?}")]
    Inconsistent { user_id: UserId, role_id: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures validating permissions a caller wants to assign to a role.
#[derive(Debug, Error)]
pub enum RoleGrantError {
    #[error("invalid permission ID: {0}")]
    InvalidId(String),

    #[error("permission not found: {0}")]
    NotFound(String),

    #[error("cannot assign permission you don't possess: {resource}:{action}")]
    NotPossessed { resource: String, action: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════════════

/// Effective permissions of a user at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPermissions {
    pub permissions: Vec<GrantedPermission>,
    /// The role's scope; `None` when the stored value is not a known scope.
    pub scope: Option<Scope>,
    /// Permission ids on the role that were skipped.
    pub unresolved: usize,
}

/// Source of a caller's effective permissions.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn get_user_permissions(&self, user_id: UserId) -> Result<ResolvedPermissions, ResolveError>;
}

/// Whether a role of scope `target` may be managed by a caller of scope `caller`.
///
/// An unknown caller scope ranks below every scope.
pub fn is_scope_allowed(target: Scope, caller: Option<Scope>) -> bool {
    caller.map_or(false, |caller| target.rank() <= caller.rank())
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolver and escalation checks backed by the user, role and permission stores.
#[derive(Clone)]
pub struct RbacService {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    permissions: Arc<dyn PermissionStore>,
}

impl RbacService {
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self {
            users,
            roles,
            permissions,
        }
    }

    /// Build from one store implementing every trait.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserStore + RoleStore + PermissionStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn roles(&self) -> Arc<dyn RoleStore> {
        Arc::clone(&self.roles)
    }

    pub fn permissions(&self) -> Arc<dyn PermissionStore> {
        Arc::clone(&self.permissions)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Exact `resource:action` check against the caller's permission set.
    pub fn validate_permission(&self, ctx: &AuthorizationContext, resource: &str, action: &str) -> bool {
        ctx.has_permission(resource, action)
    }

    /// Caller holds `roles:create` and outranks or equals the target scope.
    pub fn can_create_role(&self, ctx: &AuthorizationContext, target: Scope) -> bool {
        self.validate_permission(ctx, "roles", "create") && is_scope_allowed(target, ctx.scope)
    }

    /// Caller holds `roles:update` and outranks or equals the target scope.
    pub fn can_assign_permissions(&self, ctx: &AuthorizationContext, target: Scope) -> bool {
        self.validate_permission(ctx, "roles", "update") && is_scope_allowed(target, ctx.scope)
    }

    /// Data access constraint for reading `resource`.
    pub fn scope_filter(&self, ctx: &AuthorizationContext, resource: &str) -> ScopeFilter {
        ScopeFilter::for_context(ctx, resource)
    }

    /// Every id must parse, exist in the catalog, and name a permission the
    /// caller already holds. Returns the parsed ids.
    pub async fn validate_role_permissions(
        &self,
        ctx: &AuthorizationContext,
        permission_ids: &[String],
    ) -> Result<Vec<PermissionId>, RoleGrantError> {
        let mut validated = Vec::with_capacity(permission_ids.len());

        for raw in permission_ids {
            let id = PermissionId::parse(raw).map_err(|_| RoleGrantError::InvalidId(raw.clone()))?;

            let permission = self
                .permissions
                .find_permission(id)
                .await?
                .ok_or_else(|| RoleGrantError::NotFound(raw.clone()))?;

            if !self.validate_permission(ctx, &permission.resource, &permission.action) {
                warn!(
                    user_id = %ctx.user_id,
                    permission = %permission.grant(),
                    "Attempt to assign a permission the caller does not hold"
                );
                return Err(RoleGrantError::NotPossessed {
                    resource: permission.resource,
                    action: permission.action,
                });
            }

            validated.push(id);
        }

        Ok(validated)
    }
}

#[async_trait]
impl PermissionResolver for RbacService {
    async fn get_user_permissions(&self, user_id: UserId) -> Result<ResolvedPermissions, ResolveError> {
        let start = Instant::now();

        let user = self
            .users
            .find_user(user_id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or(ResolveError::UserNotFound(user_id))?;

        let role_id = RoleId::parse(&user.role_id).map_err(|_| ResolveError::Inconsistent {
            user_id,
            role_id: user.role_id.clone(),
        })?;

        let role = self
            .roles
            .find_role(role_id)
            .await?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| ResolveError::RoleNotFound(role_id.to_hex()))?;

        let mut permissions = Vec::with_capacity(role.permission_ids.len());
        let mut unresolved = 0usize;

        for raw in &role.permission_ids {
            let id = match PermissionId::parse(raw) {
                Ok(id) => id,
                Err(_) => {
                    warn!(role_id = %role.id, permission_id = %raw, "Skipping unparsable permission id");
                    unresolved += 1;
                    continue;
                }
            };

            match self.permissions.find_permission(id).await {
                Ok(Some(permission)) => permissions.push(permission.grant()),
                Ok(None) => {
                    warn!(role_id = %role.id, permission_id = %raw, "Skipping missing permission");
                    unresolved += 1;
                }
                Err(e) => {
                    warn!(role_id = %role.id, permission_id = %raw, error = %e, "Skipping permission after lookup error");
                    unresolved += 1;
                }
            }
        }

        if unresolved > 0 {
            counter!("warden_unresolved_permissions_total").increment(unresolved as u64);
        }
        histogram!("warden_permission_resolution_seconds").record(start.elapsed().as_secs_f64());

        debug!(
            user_id = %user_id,
            role = %role.name,
            permissions = permissions.len(),
            unresolved,
            "Resolved user permissions"
        );

        Ok(ResolvedPermissions {
            permissions,
            scope: role.scope_level(),
            unresolved,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, StoreResult};
    use crate::rbac::models::{Permission, Role, User};

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: RbacService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let service = RbacService::from_store(store.clone());
        Fixture { store, service }
    }

    fn ctx(scope: Option<Scope>, perms: &[&str]) -> AuthorizationContext {
        AuthorizationContext::new(
            UserId::new(),
            "ROLE",
            scope,
            perms.iter().filter_map(|p| GrantedPermission::parse(p)).collect(),
            None,
            "token",
        )
    }

    /// Wraps the in-memory catalog and fails lookups for one id.
    struct FlakyCatalog {
        inner: Arc<InMemoryStore>,
        failing: PermissionId,
    }

    #[async_trait]
    impl PermissionStore for FlakyCatalog {
        async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
            if id == self.failing {
                return Err(StoreError::Missing("connection".into()));
            }
            self.inner.find_permission(id).await
        }

        async fn find_by_descriptor(
            &self,
            resource: &str,
            action: &str,
            scope: Scope,
        ) -> StoreResult<Option<Permission>> {
            self.inner.find_by_descriptor(resource, action, scope).await
        }

        async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
            self.inner.list_permissions().await
        }

        async fn list_permissions_by_resource(&self, resource: &str) -> StoreResult<Vec<Permission>> {
            self.inner.list_permissions_by_resource(resource).await
        }
    }

    #[tokio::test]
    async fn test_resolves_role_permissions_and_scope() {
        let f = fixture();
        let read = Permission::new("users", "read");
        let list = Permission::new("organizations", "list");
        let role = Role::new("Manager", "", Scope::Organization).with_permissions([&read.id, &list.id]);
        let user = User::new(&role);
        f.store.put_permission(read);
        f.store.put_permission(list);
        f.store.put_role(role);
        f.store.put_user(user.clone());

        let resolved = f.service.get_user_permissions(user.id).await.unwrap();
        assert_eq!(resolved.scope, Some(Scope::Organization));
        assert_eq!(resolved.unresolved, 0);
        assert_eq!(
            resolved.permissions,
            vec![
                GrantedPermission::new("users", "read"),
                GrantedPermission::new("organizations", "list"),
            ]
        );

        let again = f.service.get_user_permissions(user.id).await.unwrap();
        assert_eq!(resolved, again);
    }

    #[tokio::test]
    async fn test_unresolvable_permission_ids_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let ok = Permission::new("users", "read");
        let broken = Permission::new("users", "delete");
        let mut role = Role::new("Viewer", "", Scope::Personal).with_permissions([&ok.id, &broken.id]);
        role.permission_ids.push("not-an-id".into());
        role.permission_ids.push(PermissionId::new().to_hex());
        let user = User::new(&role);

        let failing = broken.id;
        store.put_permission(ok);
        store.put_permission(broken);
        store.put_role(role);
        store.put_user(user.clone());

        let service = RbacService::new(
            store.clone(),
            store.clone(),
            Arc::new(FlakyCatalog {
                inner: store,
                failing,
            }),
        );

        let resolved = service.get_user_permissions(user.id).await.unwrap();
        assert_eq!(resolved.permissions, vec![GrantedPermission::new("users", "read")]);
        assert_eq!(resolved.unresolved, 3);
        assert_eq!(resolved.scope, Some(Scope::Personal));
    }

    #[tokio::test]
    async fn test_missing_or_deleted_user() {
        let f = fixture();
        let err = f.service.get_user_permissions(UserId::new()).await.unwrap_err();
        assert!(matches!(err, ResolveError::UserNotFound(_)));

        let role = Role::new("Viewer", "", Scope::Personal);
        let user = User::new(&role);
        f.store.put_role(role);
        f.store.put_user(user.clone());
        f.store.delete_user(user.id);

        let err = f.service.get_user_permissions(user.id).await.unwrap_err();
        assert!(matches!(err, ResolveError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_bad_role_reference() {
        let f = fixture();
        let role = Role::new("Viewer", "", Scope::Personal);

        let mut corrupt = User::new(&role);
        corrupt.role_id = "xyz".into();
        f.store.put_user(corrupt.clone());
        let err = f.service.get_user_permissions(corrupt.id).await.unwrap_err();
        assert!(matches!(err, ResolveError::Inconsistent { .. }));

        let dangling = User::new(&role);
        f.store.put_user(dangling.clone());
        let err = f.service.get_user_permissions(dangling.id).await.unwrap_err();
        assert!(matches!(err, ResolveError::RoleNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_stored_scope_resolves_to_none() {
        let f = fixture();
        let mut role = Role::new("Legacy", "", Scope::Personal);
        role.scope = "tenant".into();
        let user = User::new(&role);
        f.store.put_role(role);
        f.store.put_user(user.clone());

        let resolved = f.service.get_user_permissions(user.id).await.unwrap();
        assert_eq!(resolved.scope, None);
    }

    #[test]
    fn test_is_scope_allowed_all_combinations() {
        for target in Scope::ALL {
            for caller in Scope::ALL {
                assert_eq!(
                    is_scope_allowed(target, Some(caller)),
                    target.rank() <= caller.rank(),
                    "target={target} caller={caller}"
                );
            }
            assert!(!is_scope_allowed(target, None));
        }
    }

    #[test]
    fn test_validate_permission_has_no_wildcard() {
        let f = fixture();
        let c = ctx(Some(Scope::Global), &["*:*", "users:read"]);
        assert!(f.service.validate_permission(&c, "users", "read"));
        assert!(!f.service.validate_permission(&c, "users", "delete"));
    }

    #[test]
    fn test_can_create_role() {
        let f = fixture();
        let org_admin = ctx(Some(Scope::Organization), &["roles:create"]);
        assert!(f.service.can_create_role(&org_admin, Scope::Personal));
        assert!(f.service.can_create_role(&org_admin, Scope::Organization));
        assert!(!f.service.can_create_role(&org_admin, Scope::Global));

        let no_perm = ctx(Some(Scope::Global), &["roles:read"]);
        assert!(!f.service.can_create_role(&no_perm, Scope::Personal));
    }

    #[tokio::test]
    async fn test_validate_role_permissions() {
        let f = fixture();
        let held = Permission::new("users", "read");
        let unheld = Permission::new("reports", "export");
        let (held_id, unheld_id) = (held.id.to_hex(), unheld.id.to_hex());
        f.store.put_permission(held);
        f.store.put_permission(unheld);

        let c = ctx(Some(Scope::Organization), &["users:read"]);

        let ids = f
            .service
            .validate_role_permissions(&c, &[held_id.clone()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let err = f
            .service
            .validate_role_permissions(&c, &[held_id.clone(), "zz".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RoleGrantError::InvalidId(ref id) if id == "zz"));

        let missing = PermissionId::new().to_hex();
        let err = f
            .service
            .validate_role_permissions(&c, &[missing])
            .await
            .unwrap_err();
        assert!(matches!(err, RoleGrantError::NotFound(_)));

        let err = f
            .service
            .validate_role_permissions(&c, &[held_id, unheld_id])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot assign permission you don't possess: reports:export"
        );
    }
}
