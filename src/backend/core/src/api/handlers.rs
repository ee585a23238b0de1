//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, WardenError>` so that errors
//! are converted to HTTP status codes by the `IntoResponse` implementation on
//! `WardenError`. Authorization has already happened in the guard; handlers
//! only receive the resulting [`AuthorizationContext`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::error::WardenError;
use crate::rbac::{
    AuthorizationContext, CreateRoleRequest, OrganizationId, RoleId, Scope, UpdateRoleRequest,
    UserId,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Caller
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: UserId,
    pub role: String,
    pub scope: Option<Scope>,
    pub organization_id: Option<OrganizationId>,
    pub permissions: Vec<String>,
}

impl From<&AuthorizationContext> for MeResponse {
    fn from(ctx: &AuthorizationContext) -> Self {
        Self {
            user_id: ctx.user_id,
            role: ctx.role.clone(),
            scope: ctx.scope,
            organization_id: ctx.organization_id,
            permissions: ctx.permission_strings(),
        }
    }
}

pub async fn me(ctx: AuthorizationContext) -> impl IntoResponse {
    Json(ApiResponse::success(MeResponse::from(&ctx)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Catalog
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct PermissionQuery {
    pub resource: Option<String>,
}

pub async fn list_permissions(
    State(state): State<AppState>,
    Query(query): Query<PermissionQuery>,
) -> Result<impl IntoResponse, WardenError> {
    let permissions = match query.resource.as_deref().map(str::trim) {
        Some(resource) if !resource.is_empty() => state.catalog.by_resource(resource).await?,
        _ => state.catalog.available().await?,
    };

    Ok(Json(ApiResponse::success(permissions)))
}

#[derive(Debug, Deserialize)]
pub struct ValidatePermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidatePermissionsResponse {
    pub ids: Vec<String>,
}

/// Resolve `resource:action:scope` descriptors to catalog ids.
///
/// Fails on the first descriptor that is malformed or not in the catalog.
pub async fn validate_permissions(
    State(state): State<AppState>,
    Json(req): Json<ValidatePermissionsRequest>,
) -> Result<impl IntoResponse, WardenError> {
    if req.permissions.is_empty() {
        return Err(WardenError::validation("permissions must not be empty"));
    }

    let ids = state.catalog.to_ids(&req.permissions).await?;

    Ok(Json(ApiResponse::success(ValidatePermissionsResponse {
        ids: ids.iter().map(|id| id.to_hex()).collect(),
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_roles(
    State(state): State<AppState>,
    ctx: AuthorizationContext,
) -> Result<impl IntoResponse, WardenError> {
    let roles = state.roles.list_roles(&ctx).await?;
    Ok(Json(ApiResponse::success(roles)))
}

pub async fn create_role(
    State(state): State<AppState>,
    ctx: AuthorizationContext,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, WardenError> {
    let role = state.roles.create_role(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(role))))
}

pub async fn get_role(
    State(state): State<AppState>,
    ctx: AuthorizationContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, WardenError> {
    let role_id = RoleId::parse(&id)?;
    let role = state.roles.get_role(&ctx, role_id).await?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn update_role(
    State(state): State<AppState>,
    ctx: AuthorizationContext,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, WardenError> {
    let role_id = RoleId::parse(&id)?;
    let role = state.roles.update_role(&ctx, role_id, req).await?;
    Ok(Json(ApiResponse::success(role)))
}
