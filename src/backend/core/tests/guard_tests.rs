//! End-to-end guard behavior through an axum router.
//!
//! Tests cover:
//! - Missing, malformed and invalid tokens
//! - Inferred permission requirements
//! - Organization ownership on parameterized routes
//! - The scoped permission layer and its organization filter
//! - Organization access on routes naming an organization
//! - Caller context exposed to handlers

mod common;

use axum::{
    http::{Method, StatusCode},
    routing::{get, put},
    Extension, Json, Router,
};
use serde_json::{json, Map, Value};

use common::{send, send_with_authorization, TestApp};
use warden_core::middleware::{GuardConfig, GuardLayer};
use warden_core::rbac::{
    apply_organization_filter, AuthorizationContext, OrganizationAccessLayer, OrganizationFilter,
    OrganizationId, Scope, ScopedPermissionLayer,
};

async fn list_organizations(filter: Option<Extension<OrganizationFilter>>) -> Json<Value> {
    let mut query = Map::new();
    apply_organization_filter(&mut query, filter.as_ref().map(|Extension(f)| f));
    Json(Value::Object(query))
}

async fn update_organization(ctx: AuthorizationContext) -> Json<Value> {
    Json(json!({ "updatedBy": ctx.user_id.to_hex() }))
}

async fn organization_summary() -> Json<Value> {
    Json(json!({ "members": 0 }))
}

async fn get_location(ctx: AuthorizationContext) -> Json<Value> {
    Json(json!({ "viewer": ctx.user_id.to_hex() }))
}

fn locations_router(app: &TestApp) -> Router {
    Router::new()
        .route("/api/v1/locations/:id", get(get_location))
        .route_layer(GuardLayer::auto(app.state.guard.clone(), GuardConfig::default()))
}

fn organizations_router(app: &TestApp) -> Router {
    let guard = app.state.guard.clone();

    let list = Router::new()
        .route("/api/v1/organizations", get(list_organizations))
        .route_layer(ScopedPermissionLayer::new("organizations", "list"))
        .route_layer(GuardLayer::auto(guard.clone(), GuardConfig::default()));

    let update = Router::new()
        .route("/api/v1/organizations/:id", put(update_organization))
        .route_layer(GuardLayer::auto(
            guard.clone(),
            GuardConfig::default().with_ownership("organizationId", "id"),
        ));

    let summary = Router::new()
        .route("/api/v1/organizations/:id/summary", get(organization_summary))
        .route_layer(OrganizationAccessLayer::new())
        .route_layer(GuardLayer::auto(guard, GuardConfig::default()));

    list.merge(update).merge(summary)
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_request_without_token_is_rejected() {
    let app = TestApp::new();

    let (status, body) = send(app.router(), Method::GET, "/api/v1/roles", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing authentication token");
    assert_eq!(body["code"], "MISSING_TOKEN");
}

#[tokio::test]
async fn test_location_read_without_authorization_header() {
    let app = TestApp::new();

    let (status, body) = send(
        locations_router(&app),
        Method::GET,
        &format!("/api/v1/locations/{}", OrganizationId::new().to_hex()),
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing authentication token");
}

#[tokio::test]
async fn test_malformed_authorization_header_is_rejected() {
    let app = TestApp::new();
    let read = app.permission("locations", "read");
    let user = app.user("VIEWER", Scope::Personal, &[&read], None);
    let token = app.token(&user);
    let uri = format!("/api/v1/locations/{}", OrganizationId::new().to_hex());

    for value in [
        format!("Token {token}"),
        "Bearer ".to_string(),
        "Bearer".to_string(),
        format!("Bearer {token} extra"),
        format!("Bearer  {token}"),
    ] {
        let (status, body) =
            send_with_authorization(locations_router(&app), Method::GET, &uri, Some(&value), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "header {value:?}");
        assert_eq!(body["error"], "Missing authentication token");
    }

    let (status, body) = send_with_authorization(
        locations_router(&app),
        Method::GET,
        &uri,
        Some(&format!("bearer {token}")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["viewer"], user.id.to_hex());
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let app = TestApp::new();

    let (status, body) = send(
        app.router(),
        Method::GET,
        "/api/v1/me",
        Some("not.a.token"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_token_for_deleted_user_fails_resolution() {
    let app = TestApp::new();
    let user = app.user("VIEWER", Scope::Personal, &[], None);
    let token = app.token(&user);
    app.store.delete_user(user.id);

    let (status, body) = send(app.router(), Method::GET, "/api/v1/me", Some(&token), None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to get user permissions");
    assert_eq!(body["code"], "PERMISSION_RESOLUTION_FAILED");
}

#[tokio::test]
async fn test_unguarded_endpoints_need_no_token() {
    let app = TestApp::new();

    let (status, body) = send(app.router(), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(app.router(), Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Permission Requirements
// ============================================================================

#[tokio::test]
async fn test_missing_inferred_permission_is_forbidden() {
    let app = TestApp::new();
    let read = app.permission("organizations", "read");
    let user = app.user(
        "ORG_VIEWER",
        Scope::Organization,
        &[&read],
        Some(OrganizationId::new()),
    );
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::GET,
        "/api/v1/organizations",
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");
}

#[tokio::test]
async fn test_me_reports_resolved_context() {
    let app = TestApp::new();
    let org = OrganizationId::new();
    let read = app.permission("roles", "read");
    let user = app.user("ORG_ADMIN", Scope::Organization, &[&read], Some(org));
    let token = app.token(&user);

    let (status, body) = send(app.router(), Method::GET, "/api/v1/me", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user_id"], user.id.to_hex());
    assert_eq!(body["data"]["role"], "ORG_ADMIN");
    assert_eq!(body["data"]["scope"], "organization");
    assert_eq!(body["data"]["organization_id"], org.to_hex());
    assert_eq!(body["data"]["permissions"], json!(["roles:read"]));
}

#[tokio::test]
async fn test_permission_changes_apply_to_the_next_request() {
    let app = TestApp::new();
    let list = app.permission("roles", "list");
    let user = app.user("AUDITOR", Scope::Global, &[&list], None);
    let token = app.token(&user);

    let (status, _) = send(app.router(), Method::GET, "/api/v1/roles", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    app.store.remove_permission(list.id);

    let (status, _) = send(app.router(), Method::GET, "/api/v1/roles", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Ownership
// ============================================================================

#[tokio::test]
async fn test_own_organization_update_is_allowed() {
    let app = TestApp::new();
    let org = OrganizationId::new();
    let update = app.permission("organizations", "update");
    let user = app.user("ORG_ADMIN", Scope::Organization, &[&update], Some(org));
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::PUT,
        &format!("/api/v1/organizations/{}", org.to_hex()),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updatedBy"], user.id.to_hex());
}

#[tokio::test]
async fn test_other_organization_update_is_denied() {
    let app = TestApp::new();
    let update = app.permission("organizations", "update");
    let user = app.user(
        "ORG_ADMIN",
        Scope::Organization,
        &[&update],
        Some(OrganizationId::new()),
    );
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::PUT,
        &format!("/api/v1/organizations/{}", OrganizationId::new().to_hex()),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");
    assert_eq!(body["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn test_admin_role_skips_ownership() {
    let app = TestApp::new();
    let update = app.permission("organizations", "update");
    let user = app.user("PLATFORM_ADMIN", Scope::Global, &[&update], None);
    let token = app.token(&user);

    let (status, _) = send(
        organizations_router(&app),
        Method::PUT,
        &format!("/api/v1/organizations/{}", OrganizationId::new().to_hex()),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Scoped Permission Layer
// ============================================================================

#[tokio::test]
async fn test_org_scoped_caller_gets_organization_filter() {
    let app = TestApp::new();
    let org = OrganizationId::new();
    let list = app.permission("organizations", "list");
    let user = app.user("ORG_ADMIN", Scope::Organization, &[&list], Some(org));
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::GET,
        "/api/v1/organizations",
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "organizationId": org.to_hex() }));
}

#[tokio::test]
async fn test_global_caller_is_unfiltered() {
    let app = TestApp::new();
    let list = app.permission("organizations", "list");
    let user = app.user("SUPPORT", Scope::Global, &[&list], None);
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::GET,
        "/api/v1/organizations",
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

// ============================================================================
// Organization Access
// ============================================================================

#[tokio::test]
async fn test_organization_access_is_limited_to_own_organization() {
    let app = TestApp::new();
    let org = OrganizationId::new();
    let read = app.permission("organizations", "read");
    let user = app.user("ORG_ADMIN", Scope::Organization, &[&read], Some(org));
    let token = app.token(&user);

    let (status, body) = send(
        organizations_router(&app),
        Method::GET,
        &format!("/api/v1/organizations/{}/summary", org.to_hex()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["members"], 0);

    let (status, body) = send(
        organizations_router(&app),
        Method::GET,
        &format!("/api/v1/organizations/{}/summary", OrganizationId::new().to_hex()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied to this organization");
    assert_eq!(body["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn test_global_caller_reads_any_organization() {
    let app = TestApp::new();
    let read = app.permission("organizations", "read");
    let user = app.user("SUPPORT", Scope::Global, &[&read], None);
    let token = app.token(&user);

    let (status, _) = send(
        organizations_router(&app),
        Method::GET,
        &format!("/api/v1/organizations/{}/summary", OrganizationId::new().to_hex()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
