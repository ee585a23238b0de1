//! HTTP API for Warden.
//!
//! Unauthenticated endpoints:
//!
//! - `GET /health`
//! - `GET /metrics`
//!
//! Everything under `/api/v1` sits behind the [`GuardLayer`]. Role and
//! permission routes use requirements inferred from the route template;
//! `/api/v1/me` only requires a valid token.

mod handlers;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::db::{PermissionStore, RoleStore, UserStore};
use crate::middleware::{Guard, GuardConfig, GuardLayer, GuardSettings, Requirement, TokenAuthenticator};
use crate::rbac::{PermissionCatalog, RbacService, RoleService};
use crate::telemetry::{track_requests, MetricsRegistry};

pub use handlers::{MeResponse, PermissionQuery, ValidatePermissionsRequest, ValidatePermissionsResponse};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<Guard>,
    pub roles: RoleService,
    pub catalog: PermissionCatalog,
    pub metrics: MetricsRegistry,
}

impl AppState {
    /// Wire every service against one store.
    pub fn from_store<S>(
        store: Arc<S>,
        authenticator: TokenAuthenticator,
        settings: GuardSettings,
        metrics: MetricsRegistry,
    ) -> Self
    where
        S: UserStore + RoleStore + PermissionStore + 'static,
    {
        let rbac = RbacService::from_store(store.clone());
        let catalog = PermissionCatalog::new(store);
        let guard = Guard::new(
            Arc::new(authenticator),
            Arc::new(rbac.clone()),
            catalog.clone(),
            settings,
        );

        Self {
            guard: Arc::new(guard),
            roles: RoleService::new(rbac, catalog.clone()),
            catalog,
            metrics,
        }
    }
}

/// Requirements of the guarded routes, as resolved by [`build_router`].
pub fn route_requirements() -> Vec<Requirement> {
    vec![
        Requirement::new("permissions", "list"),
        Requirement::new("permissions", "read"),
        Requirement::new("roles", "list"),
        Requirement::new("roles", "create"),
        Requirement::new("roles", "read"),
        Requirement::new("roles", "update"),
    ]
}

/// Build the API router with the default request timeout.
pub fn build_router(state: AppState) -> Router {
    build_router_with_timeout(state, DEFAULT_REQUEST_TIMEOUT)
}

/// Build the API router.
///
/// Routes are registered with their full path so that the route template
/// seen by the guard lines up with the request path.
pub fn build_router_with_timeout(state: AppState, timeout: Duration) -> Router {
    let guard = state.guard.clone();

    let inferred = Router::new()
        .route("/api/v1/permissions", get(handlers::list_permissions))
        .route("/api/v1/roles", get(handlers::list_roles).post(handlers::create_role))
        .route("/api/v1/roles/:id", get(handlers::get_role).put(handlers::update_role))
        .route_layer(GuardLayer::auto(guard.clone(), GuardConfig::default()));

    let validate = Router::new()
        .route("/api/v1/permissions/validate", post(handlers::validate_permissions))
        .route_layer(GuardLayer::new(
            guard.clone(),
            GuardConfig::permission("permissions", "read"),
        ));

    let me = Router::new()
        .route("/api/v1/me", get(handlers::me))
        .route_layer(GuardLayer::new(guard, GuardConfig::default()));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .merge(inferred)
        .merge(validate)
        .merge(me)
        .layer(axum_middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API response wrapper.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn from_warden_error(err: &crate::error::WardenError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}
