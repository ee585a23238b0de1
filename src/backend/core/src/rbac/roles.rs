//! Role management with privilege-escalation checks.
//!
//! Every mutation is checked against the caller's own authority: a caller
//! can only create or modify roles at or below its own scope, and can only
//! put permissions on a role that it holds itself.

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::catalog::{CatalogError, PermissionCatalog};
use super::context::AuthorizationContext;
use super::filter::ScopeFilter;
use super::models::{Role, RoleId, Scope};
use super::policy::RbacService;
use crate::error::{ErrorCode, Result, WardenError};

/// Body of a role creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: String,
    /// `self` when omitted.
    #[serde(default)]
    pub scope: Option<String>,
    /// Permission ids as 24-character hex strings.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Body of a role update request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

fn required(value: &str, field: &'static str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WardenError::validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn reject_duplicate_ids(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    if ids.iter().all(|id| seen.insert(id.as_str())) {
        Ok(())
    } else {
        Err(WardenError::validation("duplicate permission ID found"))
    }
}

fn escalation(ctx: &AuthorizationContext, verb: &str, scope: &str) -> WardenError {
    warn!(user_id = %ctx.user_id, caller_scope = ?ctx.scope, target_scope = scope, "Role privilege escalation attempt");
    WardenError::forbidden(
        ErrorCode::PrivilegeEscalation,
        format!("Insufficient privileges to {} a role with scope {}", verb, scope),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Role creation, update and lookup on behalf of an authorized caller.
#[derive(Clone)]
pub struct RoleService {
    rbac: RbacService,
    catalog: PermissionCatalog,
}

impl RoleService {
    pub fn new(rbac: RbacService, catalog: PermissionCatalog) -> Self {
        Self { rbac, catalog }
    }

    pub fn rbac(&self) -> &RbacService {
        &self.rbac
    }

    /// Create a role owned by the caller.
    pub async fn create_role(&self, ctx: &AuthorizationContext, request: CreateRoleRequest) -> Result<Role> {
        let name = required(&request.name, "name")?;
        let description = required(&request.description, "description")?;

        let raw_scope = request.scope.as_deref().unwrap_or(Scope::Personal.as_str());
        let scope = Scope::parse(raw_scope).ok_or_else(|| CatalogError::InvalidScope(raw_scope.to_string()))?;

        reject_duplicate_ids(&request.permissions)?;

        if !self.rbac.can_create_role(ctx, scope) {
            return Err(escalation(ctx, "create", scope.as_str()));
        }

        let permission_ids = self
            .rbac
            .validate_role_permissions(ctx, &request.permissions)
            .await?;

        if self.rbac.roles().find_role_by_name(&name).await?.is_some() {
            return Err(WardenError::conflict("role with this name already exists"));
        }

        let mut role = Role::new(name, description, scope).with_permissions(&permission_ids);
        role.created_by = Some(ctx.user_id);
        if scope != Scope::Global {
            role.organization_id = ctx.organization_id;
        }

        self.rbac.roles().insert_role(&role).await?;

        counter!("warden_roles_created_total", "scope" => scope.as_str()).increment(1);
        info!(
            role_id = %role.id,
            role = %role.name,
            scope = %scope,
            permissions = role.permission_ids.len(),
            created_by = %ctx.user_id,
            "Role created"
        );

        Ok(role)
    }

    /// Create a role from `resource:action:scope` descriptors instead of ids.
    pub async fn create_role_from_descriptors<S: AsRef<str>>(
        &self,
        ctx: &AuthorizationContext,
        name: &str,
        description: &str,
        scope: Scope,
        descriptors: &[S],
    ) -> Result<Role> {
        let ids = self.catalog.to_ids(descriptors).await?;

        self.create_role(
            ctx,
            CreateRoleRequest {
                name: name.to_string(),
                description: description.to_string(),
                scope: Some(scope.as_str().to_string()),
                permissions: ids.iter().map(|id| id.to_hex()).collect(),
            },
        )
        .await
    }

    /// Update a role's name, description or permissions.
    pub async fn update_role(
        &self,
        ctx: &AuthorizationContext,
        role_id: RoleId,
        request: UpdateRoleRequest,
    ) -> Result<Role> {
        let mut role = self.visible_role(ctx, role_id).await?;

        if role.is_system {
            return Err(WardenError::forbidden(
                ErrorCode::SystemRoleImmutable,
                "System roles cannot be modified",
            ));
        }

        let allowed = role
            .scope_level()
            .map_or(false, |scope| self.rbac.can_assign_permissions(ctx, scope));
        if !allowed {
            return Err(escalation(ctx, "modify", &role.scope));
        }

        if let Some(name) = request.name {
            let name = required(&name, "name")?;
            if name != role.name && self.rbac.roles().find_role_by_name(&name).await?.is_some() {
                return Err(WardenError::conflict("role with this name already exists"));
            }
            role.name = name;
        }

        if let Some(description) = request.description {
            role.description = required(&description, "description")?;
        }

        if let Some(permissions) = request.permissions {
            reject_duplicate_ids(&permissions)?;
            let ids = self.rbac.validate_role_permissions(ctx, &permissions).await?;
            role.permission_ids = ids.iter().map(|id| id.to_hex()).collect();
        }

        role.updated_at = Utc::now();
        self.rbac.roles().update_role(&role).await?;

        info!(role_id = %role.id, updated_by = %ctx.user_id, "Role updated");
        Ok(role)
    }

    /// Fetch a role visible to the caller.
    pub async fn get_role(&self, ctx: &AuthorizationContext, role_id: RoleId) -> Result<Role> {
        self.visible_role(ctx, role_id).await
    }

    /// Roles visible to the caller, oldest first.
    pub async fn list_roles(&self, ctx: &AuthorizationContext) -> Result<Vec<Role>> {
        let filter = self.rbac.scope_filter(ctx, "roles");
        Ok(self.rbac.roles().list_roles(&filter).await?)
    }

    /// Roles outside the caller's scope filter are reported as not found.
    async fn visible_role(&self, ctx: &AuthorizationContext, role_id: RoleId) -> Result<Role> {
        let filter: ScopeFilter = self.rbac.scope_filter(ctx, "roles");

        self.rbac
            .roles()
            .find_role(role_id)
            .await?
            .filter(|role| !role.is_deleted() && filter.allows(role.created_by, role.organization_id))
            .ok_or_else(|| WardenError::not_found("role", role_id.to_hex()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
