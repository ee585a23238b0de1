//! Prometheus metrics.
//!
//! Metrics are recorded with the `metrics` macros throughout the crate and
//! exported through a Prometheus recorder installed by [`init_metrics`].
//!
//! | Metric                                   | Type      | Labels            |
//! |------------------------------------------|-----------|-------------------|
//! | `warden_token_validations_total`         | counter   | `outcome`         |
//! | `warden_guard_decisions_total`           | counter   | `outcome`,`stage` |
//! | `warden_guard_duration_seconds`          | histogram |                   |
//! | `warden_permission_resolution_seconds`   | histogram |                   |
//! | `warden_unresolved_permissions_total`    | counter   |                   |
//! | `warden_roles_created_total`             | counter   | `scope`           |
//! | `warden_errors_total`                    | counter   | `code`,`category`,`severity` |
//! | `http_request_duration_seconds`          | histogram | `method`,`route`,`status` |

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry without an exporter; renders nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error for invalid buckets or when a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("warden_token_validations_total", "Token validations by outcome");
    describe_counter!("warden_guard_decisions_total", "Guard decisions by outcome and stage");
    describe_histogram!("warden_guard_duration_seconds", "Time spent in the guard per request");
    describe_histogram!(
        "warden_permission_resolution_seconds",
        "Time spent resolving a caller's permissions"
    );
    describe_counter!(
        "warden_unresolved_permissions_total",
        "Permission ids on roles that could not be resolved"
    );
    describe_counter!("warden_roles_created_total", "Roles created by scope");
    describe_counter!("warden_errors_total", "Errors by code and category");
    describe_histogram!("http_request_duration_seconds", "HTTP request duration in seconds");
}

/// Middleware recording `http_request_duration_seconds` per matched route.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .record(start.elapsed().as_secs_f64());

    response
}
