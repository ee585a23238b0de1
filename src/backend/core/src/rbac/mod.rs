//! Scoped role-based access control.
//!
//! This module provides:
//! - **Models**: object ids, scopes, permissions, roles and users
//! - **Resolver**: effective permissions of a caller, resolved per request
//! - **Catalog**: `resource:action:scope` descriptor validation
//! - **Scope Filter**: row-level constraints derived from the caller's scope
//! - **Inference**: required permission derived from a route
//! - **Role Service**: role management with privilege-escalation checks
//! - **Scoped Layer**: route-level permission check with organization filtering
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::rbac::{RbacService, ScopeFilter};
//!
//! let rbac = RbacService::from_store(store);
//! let resolved = rbac.get_user_permissions(user_id).await?;
//!
//! // In a handler, behind the guard:
//! async fn list_users(ctx: AuthorizationContext) -> ... {
//!     let filter = ScopeFilter::for_context(&ctx, "users");
//!     ...
//! }
//! ```

pub mod catalog;
pub mod context;
pub mod filter;
pub mod inference;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod roles;

pub use catalog::{parse_descriptor, CatalogError, PermissionCatalog, PermissionDescriptor};
pub use context::AuthorizationContext;
pub use filter::ScopeFilter;
pub use inference::{
    infer_action, infer_resource, matched_params, route_params, InferredPermission, Method,
    RouteAction,
};
pub use middleware::{
    apply_organization_filter, is_global_admin, OrganizationAccessLayer, OrganizationFilter,
    ScopedPermissionLayer,
};
pub use models::{
    GrantedPermission, ObjectId, OrganizationId, Permission, PermissionAction, PermissionId, Role,
    RoleId, Scope, User, UserId,
};
pub use policy::{
    is_scope_allowed, PermissionResolver, RbacService, ResolveError, ResolvedPermissions,
    RoleGrantError,
};
pub use roles::{CreateRoleRequest, RoleService, UpdateRoleRequest};
