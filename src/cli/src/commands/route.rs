//! Route inference commands.
//!
//! Shows the permission the guard would require for a route when no explicit
//! resource or action is configured.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use warden_core::rbac::{route_params, InferredPermission, Method, RouteAction};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RouteCommands {
    /// Infer the required permission of one or more routes
    Infer {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,

        /// Route templates, e.g. `/api/v1/locations/:id/restore`
        #[arg(required = true)]
        templates: Vec<String>,

        /// Concrete path to extract route parameters from (single template only)
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Tabled, Serialize)]
struct InferenceRow {
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Route")]
    route: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Requires")]
    requires: String,
}

pub fn execute(cmd: RouteCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        RouteCommands::Infer {
            method,
            templates,
            path,
        } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("invalid HTTP method: {}", method))?;

            let rows: Vec<InferenceRow> = templates
                .iter()
                .map(|template| {
                    let inferred = InferredPermission::infer(&method, template);
                    let requires = if inferred.action == RouteAction::Unknown {
                        "(always denied)".to_string()
                    } else {
                        inferred.to_string()
                    };
                    InferenceRow {
                        method: method.to_string(),
                        route: template.clone(),
                        resource: inferred.resource,
                        action: inferred.action.to_string(),
                        requires,
                    }
                })
                .collect();
            output::print_list(&rows, format)?;

            if let (Some(path), [template]) = (path, templates.as_slice()) {
                let params: BTreeMap<String, String> = route_params(template, &path).into_iter().collect();
                match format {
                    OutputFormat::Table => {
                        output::print_header("Route parameters");
                        if params.is_empty() {
                            output::print_detail("(none)", "");
                        }
                        for (name, value) in &params {
                            output::print_detail(name, value);
                        }
                    }
                    OutputFormat::Json => output::print_item(&params)?,
                }
            }
        }
    }

    Ok(())
}
