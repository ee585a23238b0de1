#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Scoped role-based access control for HTTP services.
//!
//! ## Architecture
//!
//! - **Token Authenticator**: HMAC-signed identity tokens
//! - **Permission Resolver**: effective permissions of a caller, per request
//! - **Catalog**: `resource:action:scope` descriptor validation
//! - **Scope Filter**: row-level constraints derived from the caller's scope
//! - **Inference**: required permission derived from method and route template
//! - **Guard**: tower layer composing authentication, permission and ownership checks
//! - **Telemetry**: structured logging with token redaction and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::db::{InMemoryStore, PermissionStore, PgStore, RoleStore, StoreError, UserStore};
    pub use crate::error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};
    pub use crate::middleware::{
        extract_bearer, validate_ownership, Claims, Guard, GuardConfig, GuardError, GuardLayer,
        GuardSettings, Requirement, TokenAuthenticator, TokenError,
    };
    pub use crate::rbac::{
        AuthorizationContext, GrantedPermission, OrganizationAccessLayer, OrganizationFilter,
        OrganizationId, Permission, PermissionCatalog, PermissionResolver, RbacService, Role, RoleId,
        RoleService, Scope, ScopeFilter, ScopedPermissionLayer, User, UserId,
    };
}
