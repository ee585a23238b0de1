//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use warden_core::api::{build_router, AppState};
use warden_core::db::InMemoryStore;
use warden_core::middleware::{GuardSettings, TokenAuthenticator};
use warden_core::rbac::{OrganizationId, Permission, Role, Scope, User};
use warden_core::telemetry::MetricsRegistry;

pub const SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::from_store(
            store.clone(),
            TokenAuthenticator::new(SECRET),
            GuardSettings::default(),
            MetricsRegistry::disabled(),
        );
        Self { store, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Add a catalog record.
    pub fn permission(&self, resource: &str, action: &str) -> Permission {
        let permission = Permission::new(resource, action);
        self.store.put_permission(permission.clone());
        permission
    }

    /// Add a role holding `permissions` and a user assigned to it.
    pub fn user(
        &self,
        role_name: &str,
        scope: Scope,
        permissions: &[&Permission],
        org: Option<OrganizationId>,
    ) -> User {
        let mut role =
            Role::new(role_name, "test role", scope).with_permissions(permissions.iter().map(|p| &p.id));
        role.organization_id = org;

        let mut user = User::new(&role);
        user.organization_id = org;

        self.store.put_role(role);
        self.store.put_user(user.clone());
        user
    }

    pub fn token(&self, user: &User) -> String {
        self.state
            .guard
            .authenticator()
            .generate_token(user.id, &user.role, user.organization_id)
            .unwrap()
    }
}

/// Send one request through `router` and decode the JSON body.
pub async fn send(
    router: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let authorization = token.map(|token| format!("Bearer {token}"));
    send_with_authorization(router, method, uri, authorization.as_deref(), body).await
}

/// Like [`send`], with the `Authorization` header value given verbatim.
pub async fn send_with_authorization(
    router: Router,
    method: Method,
    uri: &str,
    authorization: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
