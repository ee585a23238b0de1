//! Per-request authorization context.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;
use std::fmt;

use super::models::{GrantedPermission, OrganizationId, Scope, UserId};
use crate::error::{ErrorCode, WardenError};
use crate::telemetry::logging::token_fingerprint;

/// Resolved identity and permission set of the caller.
///
/// Built fresh by the guard for every request and stored in the request
/// extensions; the type itself is the extension key.
#[derive(Clone, Serialize)]
pub struct AuthorizationContext {
    pub user_id: UserId,
    pub role: String,
    /// `None` when the role's stored scope is not a known scope.
    pub scope: Option<Scope>,
    pub permissions: Vec<GrantedPermission>,
    pub organization_id: Option<OrganizationId>,
    #[serde(skip)]
    token: String,
}

impl AuthorizationContext {
    pub fn new(
        user_id: UserId,
        role: impl Into<String>,
        scope: Option<Scope>,
        permissions: Vec<GrantedPermission>,
        organization_id: Option<OrganizationId>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            role: role.into(),
            scope,
            permissions,
            organization_id,
            token: token.into(),
        }
    }

    /// The bearer token the context was built from.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Exact `resource:action` membership.
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.is(resource, action))
    }

    /// Membership where a held `*` matches any resource or action.
    pub fn has_permission_or_wildcard(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.covers(resource, action))
    }

    /// Scope level, 0 for an unrecognized scope.
    pub fn scope_rank(&self) -> u8 {
        self.scope.map_or(0, Scope::rank)
    }

    pub fn permission_strings(&self) -> Vec<String> {
        self.permissions.iter().map(GrantedPermission::as_string).collect()
    }
}

impl fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("scope", &self.scope)
            .field("permissions", &self.permissions.len())
            .field("organization_id", &self.organization_id)
            .field("token", &token_fingerprint(&self.token))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthorizationContext
where
    S: Send + Sync,
{
    type Rejection = WardenError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizationContext>()
            .cloned()
            .ok_or_else(|| WardenError::new(ErrorCode::MissingToken, "Authentication required"))
    }
}
