//! Route-level scoped permission checks.
//!
//! [`ScopedPermissionLayer`] runs after the guard has attached an
//! [`AuthorizationContext`]. It checks one `resource:action` pair, honoring
//! a held `"*"` grant, and for organization-scoped callers attaches an
//! [`OrganizationFilter`] that handlers apply to their queries.
//!
//! [`OrganizationAccessLayer`] keeps non-admin callers on their own
//! organization when a route names one.

use axum::{
    body::Body,
    extract::{Query, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::context::AuthorizationContext;
use super::inference::matched_params;
use super::models::{OrganizationId, Scope};
use crate::error::{ErrorCode, WardenError};
use crate::middleware::guard::DEFAULT_ADMIN_ROLE;

// ═══════════════════════════════════════════════════════════════════════════════
// Organization Filter
// ═══════════════════════════════════════════════════════════════════════════════

/// Organization constraint for organization-scoped callers.
///
/// Stored in request extensions; the type is the extension key. A caller
/// without an organization gets a filter that matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationFilter {
    pub organization_id: Option<OrganizationId>,
}

/// Add the organization constraint, if any, to a document-store filter.
pub fn apply_organization_filter(filter: &mut Map<String, Value>, org_filter: Option<&OrganizationFilter>) {
    match org_filter {
        None => {}
        Some(OrganizationFilter {
            organization_id: Some(org),
        }) => {
            filter.insert("organizationId".to_string(), Value::String(org.to_hex()));
        }
        Some(OrganizationFilter { organization_id: None }) => {
            filter.insert("_id".to_string(), json!({ "$in": [] }));
        }
    }
}

/// Global scope or the top-level admin role.
pub fn is_global_admin(ctx: &AuthorizationContext, admin_role: &str) -> bool {
    ctx.scope == Some(Scope::Global) || ctx.role == admin_role
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer requiring one `resource:action` permission.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/organizations", get(list_organizations))
///     .route_layer(ScopedPermissionLayer::new("organizations", "list"))
///     .route_layer(GuardLayer::new(guard, GuardConfig::default()));
/// ```
#[derive(Debug, Clone)]
pub struct ScopedPermissionLayer {
    resource: String,
    action: String,
    admin_role: String,
}

impl ScopedPermissionLayer {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }

    pub fn with_admin_role(mut self, role: impl Into<String>) -> Self {
        self.admin_role = role.into();
        self
    }
}

impl<S> Layer<S> for ScopedPermissionLayer {
    type Service = ScopedPermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ScopedPermissionService {
            inner,
            layer: self.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ScopedPermissionService<S> {
    inner: S,
    layer: ScopedPermissionLayer,
}

impl<S> Service<Request<Body>> for ScopedPermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(ctx) = request.extensions().get::<AuthorizationContext>().cloned() else {
                return Ok(
                    WardenError::new(ErrorCode::MissingToken, "Authentication required").into_response()
                );
            };

            if !ctx.has_permission_or_wildcard(&layer.resource, &layer.action) {
                warn!(
                    user_id = %ctx.user_id,
                    required_permission = %format!("{}:{}", layer.resource, layer.action),
                    user_permissions = ?ctx.permission_strings(),
                    "Permission denied"
                );
                return Ok(WardenError::with_internal(
                    ErrorCode::InsufficientPermissions,
                    "Insufficient permissions",
                    format!("missing {}:{}", layer.resource, layer.action),
                )
                .into_response());
            }

            if ctx.scope == Some(Scope::Organization) && !is_global_admin(&ctx, &layer.admin_role) {
                debug!(
                    user_id = %ctx.user_id,
                    permission = %format!("{}:{}", layer.resource, layer.action),
                    organization_id = ?ctx.organization_id,
                    "Organization-scoped access granted"
                );
                request.extensions_mut().insert(OrganizationFilter {
                    organization_id: ctx.organization_id,
                });
            }

            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organization Access
// ═══════════════════════════════════════════════════════════════════════════════

/// Route parameter or query key naming the requested organization.
const ORGANIZATION_ID_KEY: &str = "organizationId";

/// Layer denying access to organizations other than the caller's own.
///
/// The requested organization is the `id` route parameter, else the
/// `organizationId` route parameter, else the `organizationId` query
/// parameter. Requests naming no organization pass through. Global admins
/// are never restricted.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/organizations/:id", get(get_organization))
///     .route_layer(OrganizationAccessLayer::new())
///     .route_layer(ScopedPermissionLayer::new("organizations", "read"))
///     .route_layer(GuardLayer::new(guard, GuardConfig::default()));
/// ```
#[derive(Debug, Clone)]
pub struct OrganizationAccessLayer {
    admin_role: String,
}

impl OrganizationAccessLayer {
    pub fn new() -> Self {
        Self {
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }

    pub fn with_admin_role(mut self, role: impl Into<String>) -> Self {
        self.admin_role = role.into();
        self
    }
}

impl Default for OrganizationAccessLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for OrganizationAccessLayer {
    type Service = OrganizationAccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OrganizationAccessService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrganizationAccessService<S> {
    inner: S,
    layer: OrganizationAccessLayer,
}

/// Organization id named by the request, if any.
async fn requested_organization(parts: &mut axum::http::request::Parts) -> Option<String> {
    let mut params = matched_params(parts).await;
    let from_path = ["id", ORGANIZATION_ID_KEY]
        .iter()
        .find_map(|key| params.remove(*key).filter(|v| !v.is_empty()));
    if from_path.is_some() {
        return from_path;
    }

    Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut query)| query.remove(ORGANIZATION_ID_KEY))
        .filter(|v| !v.is_empty())
}

impl<S> Service<Request<Body>> for OrganizationAccessService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(ctx) = request.extensions().get::<AuthorizationContext>().cloned() else {
                return Ok(
                    WardenError::new(ErrorCode::AccessDenied, "Access control context missing").into_response()
                );
            };

            if is_global_admin(&ctx, &layer.admin_role) {
                return inner.call(request).await;
            }

            let (mut parts, body) = request.into_parts();
            if let Some(requested) = requested_organization(&mut parts).await {
                let own = ctx.organization_id.map(|org| org.to_hex());
                if own.as_deref() != Some(requested.as_str()) {
                    warn!(
                        user_id = %ctx.user_id,
                        user_org_id = ?own,
                        requested_org_id = %requested,
                        "Organization access denied"
                    );
                    return Ok(
                        WardenError::new(ErrorCode::AccessDenied, "Access denied to this organization")
                            .into_response(),
                    );
                }
            }

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
