//! Guard middleware: authentication, permission and ownership checks.
//!
//! A request moves through the stages
//! `Start → TokenChecked → PermissionChecked → OwnershipChecked → Authorized`
//! and is rejected at the first failing stage.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::middleware::guard::{Guard, GuardConfig, GuardLayer};
//!
//! let guard = Arc::new(Guard::new(authenticator, resolver, catalog, GuardSettings::default()));
//!
//! let app = Router::new()
//!     .route("/locations/:id", get(get_location).put(update_location))
//!     .route_layer(GuardLayer::auto(guard.clone(), GuardConfig::default()))
//!     .route("/users/:id", get(get_user))
//!     .route_layer(GuardLayer::new(
//!         guard,
//!         GuardConfig::permission("users", "read").with_ownership("userId", "id"),
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::auth::{extract_bearer, TokenAuthenticator, TokenError};
use crate::rbac::catalog::{CatalogError, PermissionCatalog};
use crate::rbac::context::AuthorizationContext;
use crate::rbac::inference::{matched_params, InferredPermission, RouteAction};
use crate::rbac::models::{OrganizationId, UserId};
use crate::rbac::policy::{PermissionResolver, ResolveError};

/// Role name exempt from ownership checks.
pub const DEFAULT_ADMIN_ROLE: &str = "PLATFORM_ADMIN";

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings shared by every guarded route.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// Callers with this role skip ownership checks.
    pub admin_role: String,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }
}

/// Per-route guard configuration.
///
/// With [`GuardLayer::auto`] the required resource and action are inferred
/// from the route; values set here override the inferred ones.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub require_auth: bool,
    pub required_resource: Option<String>,
    pub required_action: Option<String>,
    pub require_ownership: bool,
    /// `userId` or `organizationId`.
    pub ownership_field: String,
    /// Route parameter holding the owning id.
    pub ownership_id_param: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            required_resource: None,
            required_action: None,
            require_ownership: false,
            ownership_field: String::new(),
            ownership_id_param: String::new(),
        }
    }
}

impl GuardConfig {
    /// Authenticate and require `resource:action`.
    pub fn permission(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            required_resource: Some(resource.into()),
            required_action: Some(action.into()),
            ..Self::default()
        }
    }

    /// Skip authentication; reuse a context attached by an upstream guard.
    pub fn reuse_context(mut self) -> Self {
        self.require_auth = false;
        self
    }

    pub fn with_ownership(mut self, field: impl Into<String>, param: impl Into<String>) -> Self {
        self.require_ownership = true;
        self.ownership_field = field.into();
        self.ownership_id_param = param.into();
        self
    }

    pub fn with_custom_action(mut self, action: impl Into<String>) -> Self {
        self.required_action = Some(action.into());
        self
    }

    pub fn with_custom_resource(mut self, resource: impl Into<String>) -> Self {
        self.required_resource = Some(resource.into());
        self
    }

    /// The explicit `(resource, action)` requirement, if both are set.
    pub fn requirement(&self) -> Option<Requirement> {
        match (&self.required_resource, &self.required_action) {
            (Some(resource), Some(action)) if !resource.is_empty() && !action.is_empty() => {
                Some(Requirement::new(resource.as_str(), action.as_str()))
            }
            _ => None,
        }
    }

    /// Requirement for a route: inferred, then overridden by explicit values.
    pub fn requirement_for(&self, inferred: InferredPermission) -> Requirement {
        Requirement {
            resource: self
                .required_resource
                .clone()
                .unwrap_or(inferred.resource),
            action: self
                .required_action
                .clone()
                .unwrap_or_else(|| inferred.action.as_str().to_string()),
        }
    }
}

/// A required `resource:action` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub resource: String,
    pub action: String,
}

impl Requirement {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stages and Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Pipeline stage a request has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStage {
    Start,
    TokenChecked,
    PermissionChecked,
    OwnershipChecked,
    Authorized,
}

impl GuardStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::TokenChecked => "token_checked",
            Self::PermissionChecked => "permission_checked",
            Self::OwnershipChecked => "ownership_checked",
            Self::Authorized => "authorized",
        }
    }
}

/// Guard rejections.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken(#[source] TokenError),

    #[error("Invalid user ID in token")]
    InvalidSubject(String),

    #[error("Failed to get user permissions")]
    Resolution(#[source] ResolveError),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    InsufficientPermissions(Requirement),

    #[error("Access denied")]
    AccessDenied,
}

impl GuardError {
    /// Stage the request was in when it was rejected.
    pub fn stage(&self) -> GuardStage {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::InvalidSubject(_) | Self::Resolution(_) => {
                GuardStage::Start
            }
            Self::Unauthenticated | Self::InsufficientPermissions(_) => GuardStage::TokenChecked,
            Self::AccessDenied => GuardStage::PermissionChecked,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::InvalidSubject(_) | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::Resolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InsufficientPermissions(_) | Self::AccessDenied => StatusCode::FORBIDDEN,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ownership
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether the route parameter value names the caller (`userId`) or the
/// caller's organization (`organizationId`).
///
/// Unknown fields and missing or empty values never match.
pub fn validate_ownership(field: &str, param_value: Option<&str>, ctx: &AuthorizationContext) -> bool {
    let Some(value) = param_value.filter(|v| !v.is_empty()) else {
        return false;
    };

    match field {
        "userId" => ctx.user_id.to_hex() == value,
        "organizationId" => ctx
            .organization_id
            .map_or(false, |org| org.to_hex() == value),
        _ => {
            warn!(field, "Unknown ownership field");
            false
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════════════════════════════════════════

/// Collaborators shared by every guarded route.
pub struct Guard {
    authenticator: Arc<TokenAuthenticator>,
    resolver: Arc<dyn PermissionResolver>,
    catalog: PermissionCatalog,
    settings: GuardSettings,
}

impl Guard {
    pub fn new(
        authenticator: Arc<TokenAuthenticator>,
        resolver: Arc<dyn PermissionResolver>,
        catalog: PermissionCatalog,
        settings: GuardSettings,
    ) -> Self {
        Self {
            authenticator,
            resolver,
            catalog,
            settings,
        }
    }

    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.authenticator
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Build an authorization context from the request's bearer token.
    pub async fn authenticate(&self, parts: &Parts) -> Result<AuthorizationContext, GuardError> {
        let token = extract_bearer(&parts.headers).ok_or(GuardError::MissingToken)?;

        let claims = self
            .authenticator
            .validate_token(token)
            .map_err(GuardError::InvalidToken)?;

        let user_id =
            UserId::parse(&claims.user_id).map_err(|_| GuardError::InvalidSubject(claims.user_id.clone()))?;

        let resolved = self
            .resolver
            .get_user_permissions(user_id)
            .await
            .map_err(GuardError::Resolution)?;

        let organization_id = claims
            .organization_id
            .as_deref()
            .and_then(|raw| match OrganizationId::parse(raw) {
                Ok(org) => Some(org),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Ignoring invalid organization id in token");
                    None
                }
            });

        Ok(AuthorizationContext::new(
            user_id,
            claims.role,
            resolved.scope,
            resolved.permissions,
            organization_id,
            token,
        ))
    }

    /// Run the guard stages for one request.
    ///
    /// `params` are the route parameters used by the ownership check.
    /// Returns the context to attach, or `None` when the route needs neither
    /// authentication nor an upstream context.
    pub async fn evaluate(
        &self,
        config: &GuardConfig,
        requirement: Option<&Requirement>,
        parts: &Parts,
        params: &HashMap<String, String>,
    ) -> Result<Option<AuthorizationContext>, GuardError> {
        let ctx = if config.require_auth {
            Some(self.authenticate(parts).await?)
        } else {
            parts.extensions.get::<AuthorizationContext>().cloned()
        };

        if let Some(requirement) = requirement {
            let ctx = ctx.as_ref().ok_or(GuardError::Unauthenticated)?;
            let denied = requirement.action == RouteAction::Unknown.as_str()
                || !ctx.has_permission(&requirement.resource, &requirement.action);
            if denied {
                debug!(
                    user_id = %ctx.user_id,
                    required = %requirement,
                    "Permission denied"
                );
                return Err(GuardError::InsufficientPermissions(requirement.clone()));
            }
        }

        if config.require_ownership {
            let ctx = ctx.as_ref().ok_or(GuardError::Unauthenticated)?;
            if ctx.role != self.settings.admin_role {
                let value = params.get(&config.ownership_id_param).map(String::as_str);
                if !validate_ownership(&config.ownership_field, value, ctx) {
                    debug!(
                        user_id = %ctx.user_id,
                        field = %config.ownership_field,
                        param = %config.ownership_id_param,
                        "Ownership check failed"
                    );
                    return Err(GuardError::AccessDenied);
                }
            }
        }

        Ok(ctx)
    }

    /// Requirements that no catalog record grants.
    ///
    /// Such routes can only be reached by callers holding a permission that
    /// was never catalogued.
    pub async fn unreachable_requirements(
        &self,
        requirements: &[Requirement],
    ) -> Result<Vec<Requirement>, CatalogError> {
        let available = self.catalog.available().await?;
        Ok(requirements
            .iter()
            .filter(|r| {
                !available
                    .iter()
                    .any(|p| p.resource == r.resource && p.action == r.action)
            })
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum RequirementSource {
    Explicit,
    Inferred,
}

/// Layer enforcing a [`GuardConfig`] on every request.
///
/// Apply with `Router::route_layer` so that the matched route template is
/// available for inference and ownership parameters.
#[derive(Clone)]
pub struct GuardLayer {
    guard: Arc<Guard>,
    config: Arc<GuardConfig>,
    source: RequirementSource,
}

impl GuardLayer {
    /// Guard with the explicit requirement in `config`, if any.
    pub fn new(guard: Arc<Guard>, config: GuardConfig) -> Self {
        Self {
            guard,
            config: Arc::new(config),
            source: RequirementSource::Explicit,
        }
    }

    /// Guard whose requirement is inferred from the method and route template.
    pub fn auto(guard: Arc<Guard>, config: GuardConfig) -> Self {
        Self {
            guard,
            config: Arc::new(GuardConfig {
                require_auth: true,
                ..config
            }),
            source: RequirementSource::Inferred,
        }
    }
}

impl<S> Layer<S> for GuardLayer {
    type Service = GuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GuardService {
            inner,
            guard: self.guard.clone(),
            config: self.config.clone(),
            source: self.source,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct GuardService<S> {
    inner: S,
    guard: Arc<Guard>,
    config: Arc<GuardConfig>,
    source: RequirementSource,
}

impl<S> Service<Request<Body>> for GuardService<S>
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
        let guard = self.guard.clone();
        let config = self.config.clone();
        let source = self.source;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let start = Instant::now();
            let (mut parts, body) = request.into_parts();

            let template = parts
                .extensions
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            let params = matched_params(&mut parts).await;

            let requirement = match source {
                RequirementSource::Explicit => config.requirement(),
                RequirementSource::Inferred => Some(
                    config.requirement_for(InferredPermission::infer(&parts.method, &template)),
                ),
            };

            let outcome = guard
                .evaluate(&config, requirement.as_ref(), &parts, &params)
                .await;
            histogram!("warden_guard_duration_seconds").record(start.elapsed().as_secs_f64());

            match outcome {
                Ok(ctx) => {
                    counter!(
                        "warden_guard_decisions_total",
                        "outcome" => "allowed",
                        "stage" => GuardStage::Authorized.as_str()
                    )
                    .increment(1);

                    if let Some(ctx) = ctx {
                        parts.extensions.insert(ctx);
                    }
                    inner.call(Request::from_parts(parts, body)).await
                }
                Err(e) => {
                    counter!(
                        "warden_guard_decisions_total",
                        "outcome" => "rejected",
                        "stage" => e.stage().as_str()
                    )
                    .increment(1);

                    debug!(
                        method = %parts.method,
                        path = %parts.uri.path(),
                        route = %template,
                        stage = e.stage().as_str(),
                        reason = %e,
                        "Request rejected by guard"
                    );
                    Ok(crate::error::WardenError::from(e).into_response())
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::rbac::models::{GrantedPermission, Permission, Role, Scope, User};
    use crate::rbac::policy::RbacService;
    use axum::http::{header::AUTHORIZATION, Method};

    const SECRET: &str = "guard-test-secret";

    struct Fixture {
        store: Arc<InMemoryStore>,
        guard: Guard,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let guard = Guard::new(
            Arc::new(TokenAuthenticator::new(SECRET)),
            Arc::new(RbacService::from_store(store.clone())),
            PermissionCatalog::new(store.clone()),
            GuardSettings::default(),
        );
        Fixture { store, guard }
    }

    impl Fixture {
        fn user(&self, role_name: &str, scope: Scope, perms: &[(&str, &str)], org: Option<OrganizationId>) -> User {
            let perms: Vec<Permission> = perms.iter().map(|(r, a)| Permission::new(*r, *a)).collect();
            let mut role = Role::new(role_name, "", scope).with_permissions(perms.iter().map(|p| &p.id));
            role.organization_id = org;
            let mut user = User::new(&role);
            user.organization_id = org;
            for p in perms {
                self.store.put_permission(p);
            }
            self.store.put_role(role);
            self.store.put_user(user.clone());
            user
        }

        fn token_for(&self, user: &User) -> String {
            self.guard
                .authenticator()
                .generate_token(user.id, &user.role, user.organization_id)
                .unwrap()
        }
    }

    fn parts(method: Method, path: &str, bearer: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_missing_and_invalid_tokens() {
        let f = fixture();
        let config = GuardConfig::default();
        let params = HashMap::new();

        let err = f
            .guard
            .evaluate(&config, None, &parts(Method::GET, "/", None), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::MissingToken));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = f
            .guard
            .evaluate(&config, None, &parts(Method::GET, "/", Some("garbage")), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidToken(_)));
        assert_eq!(err.to_string(), "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_subject_must_be_object_id() {
        let f = fixture();
        let claims = crate::middleware::auth::Claims {
            user_id: "not-hex".into(),
            role: "VIEWER".into(),
            organization_id: None,
            iat: chrono::Utc::now().timestamp(),
            exp: chrono::Utc::now().timestamp() + 60,
        };
        let token = f.guard.authenticator().sign(&claims).unwrap();

        let err = f
            .guard
            .evaluate(&GuardConfig::default(), None, &parts(Method::GET, "/", Some(&token)), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidSubject(_)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_user_is_resolution_failure() {
        let f = fixture();
        let token = f
            .guard
            .authenticator()
            .generate_token(UserId::new(), "VIEWER", None)
            .unwrap();

        let err = f
            .guard
            .evaluate(&GuardConfig::default(), None, &parts(Method::GET, "/", Some(&token)), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Resolution(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to get user permissions");
    }

    #[tokio::test]
    async fn test_context_carries_resolved_permissions() {
        let f = fixture();
        let org = OrganizationId::new();
        let user = f.user("ORG_ADMIN", Scope::Organization, &[("users", "read")], Some(org));
        let token = f.token_for(&user);

        let ctx = f
            .guard
            .evaluate(
                &GuardConfig::permission("users", "read"),
                Some(&Requirement::new("users", "read")),
                &parts(Method::GET, "/users", Some(&token)),
                &HashMap::new(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ctx.user_id, user.id);
        assert_eq!(ctx.role, "ORG_ADMIN");
        assert_eq!(ctx.scope, Some(Scope::Organization));
        assert_eq!(ctx.organization_id, Some(org));
        assert_eq!(ctx.permissions, vec![GrantedPermission::new("users", "read")]);
        assert_eq!(ctx.token(), token);
    }

    #[tokio::test]
    async fn test_invalid_token_organization_is_ignored() {
        let f = fixture();
        let user = f.user("VIEWER", Scope::Personal, &[], None);
        let now = chrono::Utc::now().timestamp();
        let claims = crate::middleware::auth::Claims {
            user_id: user.id.to_hex(),
            role: user.role.clone(),
            organization_id: Some("bogus".into()),
            iat: now,
            exp: now + 60,
        };
        let token = f.guard.authenticator().sign(&claims).unwrap();

        let ctx = f
            .guard
            .evaluate(&GuardConfig::default(), None, &parts(Method::GET, "/", Some(&token)), &HashMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.organization_id, None);
    }

    #[tokio::test]
    async fn test_permission_stage() {
        let f = fixture();
        let user = f.user("VIEWER", Scope::Personal, &[("users", "read")], None);
        let token = f.token_for(&user);
        let request = parts(Method::PATCH, "/users", Some(&token));

        let err = f
            .guard
            .evaluate(
                &GuardConfig::default(),
                Some(&Requirement::new("users", "update")),
                &request,
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage(), GuardStage::TokenChecked);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = f
            .guard
            .evaluate(
                &GuardConfig::default(),
                Some(&Requirement::new("users", "unknown")),
                &request,
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InsufficientPermissions(_)));
    }

    #[tokio::test]
    async fn test_reused_context_required_for_permission_check() {
        let f = fixture();
        let config = GuardConfig::permission("users", "read").reuse_context();
        let requirement = config.requirement();
        let mut request = parts(Method::GET, "/users", None);

        let err = f
            .guard
            .evaluate(&config, requirement.as_ref(), &request, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Unauthenticated));

        request.extensions.insert(AuthorizationContext::new(
            UserId::new(),
            "VIEWER",
            Some(Scope::Personal),
            vec![GrantedPermission::new("users", "read")],
            None,
            "upstream",
        ));
        let ctx = f
            .guard
            .evaluate(&config, requirement.as_ref(), &request, &HashMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.token(), "upstream");
    }

    #[tokio::test]
    async fn test_ownership_stage_and_admin_bypass() {
        let f = fixture();
        let org = OrganizationId::new();
        let member = f.user("ORG_ADMIN", Scope::Organization, &[], Some(org));
        let admin = f.user(DEFAULT_ADMIN_ROLE, Scope::Global, &[], None);
        let config = GuardConfig::default().with_ownership("organizationId", "id");

        let own: HashMap<String, String> = [("id".to_string(), org.to_hex())].into();
        let other: HashMap<String, String> = [("id".to_string(), OrganizationId::new().to_hex())].into();

        let member_req = parts(Method::PUT, "/organizations/x", Some(&f.token_for(&member)));
        assert!(f.guard.evaluate(&config, None, &member_req, &own).await.is_ok());

        let err = f.guard.evaluate(&config, None, &member_req, &other).await.unwrap_err();
        assert!(matches!(err, GuardError::AccessDenied));
        assert_eq!(err.stage(), GuardStage::PermissionChecked);

        let admin_req = parts(Method::PUT, "/organizations/x", Some(&f.token_for(&admin)));
        assert!(f.guard.evaluate(&config, None, &admin_req, &other).await.is_ok());
    }

    #[tokio::test]
    async fn test_layer_decodes_ownership_param_under_nest() {
        use axum::{routing::put, Router};
        use tower::ServiceExt;

        let f = fixture();
        let org = OrganizationId::new();
        let member = f.user("ORG_ADMIN", Scope::Organization, &[], Some(org));
        let token = f.token_for(&member);

        let app = Router::new().nest(
            "/api/v1",
            Router::new()
                .route("/organizations/:id", put(|| async { "ok" }))
                .route_layer(GuardLayer::new(
                    Arc::new(f.guard),
                    GuardConfig::default().with_ownership("organizationId", "id"),
                )),
        );

        let hex = org.to_hex();
        let (first, rest) = hex.split_at(1);
        let encoded = format!("%{:02X}{}", first.as_bytes()[0], rest);

        let status_for = |id: String| {
            let app = app.clone();
            let token = token.clone();
            async move {
                app.oneshot(
                    Request::builder()
                        .method(Method::PUT)
                        .uri(format!("/api/v1/organizations/{id}"))
                        .header(AUTHORIZATION, format!("Bearer {token}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
                .status()
            }
        };

        assert_eq!(status_for(encoded).await, StatusCode::OK);
        assert_eq!(status_for(OrganizationId::new().to_hex()).await, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validate_ownership() {
        let org = OrganizationId::new();
        let ctx = AuthorizationContext::new(UserId::new(), "VIEWER", Some(Scope::Personal), vec![], Some(org), "t");
        let user_hex = ctx.user_id.to_hex();
        let org_hex = org.to_hex();

        assert!(validate_ownership("userId", Some(&user_hex), &ctx));
        assert!(!validate_ownership("userId", Some(&org_hex), &ctx));
        assert!(validate_ownership("organizationId", Some(&org_hex), &ctx));
        assert!(!validate_ownership("organizationId", Some(""), &ctx));
        assert!(!validate_ownership("organizationId", None, &ctx));
        assert!(!validate_ownership("locationId", Some(&user_hex), &ctx));

        let orphan = AuthorizationContext::new(UserId::new(), "VIEWER", None, vec![], None, "t");
        assert!(!validate_ownership("organizationId", Some(&org_hex), &orphan));
    }

    #[test]
    fn test_requirement_overrides() {
        let inferred = InferredPermission::infer(&Method::POST, "/locations/:id/media");
        let config = GuardConfig::default().with_custom_action("update");
        assert_eq!(config.requirement_for(inferred.clone()), Requirement::new("locations", "update"));

        let config = GuardConfig::default().with_custom_resource("files");
        assert_eq!(config.requirement_for(inferred), Requirement::new("files", "upload"));

        assert_eq!(GuardConfig::default().requirement(), None);
        assert_eq!(
            GuardConfig::permission("roles", "create").requirement(),
            Some(Requirement::new("roles", "create"))
        );
    }

    #[tokio::test]
    async fn test_unreachable_requirements() {
        let f = fixture();
        f.store.put_permission(Permission::new("users", "read"));

        let missing = f
            .guard
            .unreachable_requirements(&[Requirement::new("users", "read"), Requirement::new("users", "list")])
            .await
            .unwrap();
        assert_eq!(missing, vec![Requirement::new("users", "list")]);
    }
}
