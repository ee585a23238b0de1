//! Infer the required permission of a route from its method and template.
//!
//! `GET /api/v1/locations/:id` requires `locations:read`,
//! `POST /locations/:id/restore` requires `locations:restore`, and so on.
//! Templates use axum's `:param` syntax as reported by `MatchedPath`.

use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::request::Parts;
pub use axum::http::Method;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Leading path segments that never name a resource.
const SKIPPED_SEGMENTS: [&str; 4] = ["api", "v1", "v2", "v3"];

/// Resource used when no segment qualifies.
pub const UNKNOWN_RESOURCE: &str = "unknown";

/// Action derived from an HTTP method and route template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAction {
    Read,
    List,
    Create,
    Update,
    Delete,
    Restore,
    Upload,
    HardDelete,
    /// Any other method. Never granted.
    Unknown,
}

impl RouteAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Upload => "upload",
            Self::HardDelete => "hard_delete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(resource, action)` requirement inferred from a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredPermission {
    pub resource: String,
    pub action: RouteAction,
}

impl InferredPermission {
    pub fn infer(method: &Method, template: &str) -> Self {
        Self {
            resource: infer_resource(template),
            action: infer_action(method, template),
        }
    }
}

impl fmt::Display for InferredPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// `:name` captures and axum's `*rest` catch-all; neither names a resource,
/// so `/files/*path` infers `files` and `/*path` infers `unknown`.
fn is_param(segment: &str) -> bool {
    segment.starts_with(':') || segment.starts_with('*')
}

/// First segment that is not empty, not a parameter and not a version
/// prefix, pluralized by appending `s` unless it already ends in `s`.
pub fn infer_resource(template: &str) -> String {
    template
        .split('/')
        .find(|s| !s.is_empty() && !is_param(s) && !SKIPPED_SEGMENTS.contains(s))
        .map(|s| {
            if s.ends_with('s') {
                s.to_string()
            } else {
                format!("{s}s")
            }
        })
        .unwrap_or_else(|| UNKNOWN_RESOURCE.to_string())
}

pub fn infer_action(method: &Method, template: &str) -> RouteAction {
    match *method {
        Method::GET if template.contains(':') => RouteAction::Read,
        Method::GET => RouteAction::List,
        Method::POST if template.contains("restore") => RouteAction::Restore,
        Method::POST if template.contains("media") => RouteAction::Upload,
        Method::POST => RouteAction::Create,
        Method::PUT => RouteAction::Update,
        Method::DELETE if template.contains("hard-delete") => RouteAction::HardDelete,
        Method::DELETE => RouteAction::Delete,
        _ => RouteAction::Unknown,
    }
}

/// Path parameters obtained by aligning `template` with the concrete `path`.
///
/// A trailing `*rest` segment captures the remainder of the path. Segments
/// beyond the shorter of the two are ignored. Values are not percent-decoded;
/// this is a preview for templates outside a router. Middleware reads the
/// router's captures through [`matched_params`].
pub fn route_params(template: &str, path: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut concrete = path.split('/');

    for segment in template.split('/') {
        if let Some(name) = segment.strip_prefix('*') {
            let rest: Vec<&str> = concrete.by_ref().collect();
            params.insert(name.to_string(), rest.join("/"));
            break;
        }

        let Some(value) = concrete.next() else { break };
        if let Some(name) = segment.strip_prefix(':') {
            params.insert(name.to_string(), value.to_string());
        }
    }

    params
}

/// Path parameters the router captured for this request, percent-decoded.
///
/// Empty when the request was not routed or a value is not valid UTF-8.
pub async fn matched_params(parts: &mut Parts) -> HashMap<String, String> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(rejection) => {
            debug!(reason = %rejection, "Route parameters unavailable");
            HashMap::new()
        }
    }
}
