//! In-memory store backed by `DashMap`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};

use super::{PermissionStore, RoleStore, StoreError, StoreResult, UserStore};
use crate::rbac::filter::ScopeFilter;
use crate::rbac::models::{Permission, PermissionId, Role, RoleId, Scope, User, UserId};

/// Concurrent in-memory implementation of every store trait.
///
/// `role_names` maps each live role name to its role. Name checks lock the
/// name's entry first and the role map second.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: DashMap<UserId, User>,
    roles: DashMap<RoleId, Role>,
    role_names: DashMap<String, RoleId>,
    permissions: DashMap<PermissionId, Permission>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn put_role(&self, role: Role) {
        let indexed = (!role.is_deleted()).then(|| (role.name.clone(), role.id));
        self.roles.insert(role.id, role);
        if let Some((name, id)) = indexed {
            self.claim_name(name, id);
        }
    }

    pub fn put_permission(&self, permission: Permission) {
        self.permissions.insert(permission.id, permission);
    }

    /// Soft-delete a user.
    pub fn delete_user(&self, id: UserId) -> bool {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn remove_permission(&self, id: PermissionId) -> Option<Permission> {
        self.permissions.remove(&id).map(|(_, p)| p)
    }

    pub fn role_count(&self) -> usize {
        self.roles.iter().filter(|r| !r.is_deleted()).count()
    }

    /// Whether `id` is a live role still named `name`.
    fn holds_name(&self, id: RoleId, name: &str) -> bool {
        self.roles
            .get(&id)
            .is_some_and(|r| !r.is_deleted() && r.name == name)
    }

    /// Point `name` at `id` unless another live role holds it.
    fn claim_name(&self, name: String, id: RoleId) {
        match self.role_names.entry(name) {
            Entry::Occupied(mut entry) => {
                if !self.holds_name(*entry.get(), entry.key()) {
                    entry.insert(id);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.roles.get(&id).map(|r| r.clone()))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .roles
            .iter()
            .find(|r| !r.is_deleted() && r.name == name)
            .map(|r| r.clone()))
    }

    async fn list_roles(&self, filter: &ScopeFilter) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .roles
            .iter()
            .filter(|r| !r.is_deleted())
            .filter(|r| filter.allows(r.created_by, r.organization_id))
            .map(|r| r.clone())
            .collect();
        roles.sort_by_key(|r| (r.created_at, r.id));
        Ok(roles)
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        // The name entry stays locked until the role is visible.
        let entry = self.role_names.entry(role.name.clone());
        if let Entry::Occupied(existing) = &entry {
            if self.holds_name(*existing.get(), &role.name) {
                return Err(StoreError::Duplicate(format!("role name {}", role.name)));
            }
        }
        self.roles.insert(role.id, role.clone());
        entry.insert(role.id);
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        match self.roles.get_mut(&role.id) {
            Some(mut existing) => *existing = role.clone(),
            None => return Err(StoreError::Missing(format!("role {}", role.id))),
        }
        if !role.is_deleted() {
            self.claim_name(role.name.clone(), role.id);
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.permissions.get(&id).map(|p| p.clone()))
    }

    async fn find_by_descriptor(
        &self,
        resource: &str,
        action: &str,
        scope: Scope,
    ) -> StoreResult<Option<Permission>> {
        Ok(self
            .permissions
            .iter()
            .find(|p| p.resource == resource && p.action == action && p.scope == Some(scope))
            .map(|p| p.clone()))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut all: Vec<Permission> = self.permissions.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        Ok(all)
    }

    async fn list_permissions_by_resource(&self, resource: &str) -> StoreResult<Vec<Permission>> {
        let mut matching: Vec<Permission> = self
            .permissions
            .iter()
            .filter(|p| p.resource == resource)
            .map(|p| p.clone())
            .collect();
        matching.sort_by(|a, b| a.action.cmp(&b.action));
        Ok(matching)
    }
}
