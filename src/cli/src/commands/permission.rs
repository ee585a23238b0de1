//! Permission descriptor commands.

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use warden_core::rbac::{parse_descriptor, GrantedPermission};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// Parse `resource:action:scope` descriptors
    Parse {
        /// Descriptors to parse
        #[arg(required = true)]
        descriptors: Vec<String>,
    },

    /// Check whether a set of held permissions satisfies a requirement
    Check {
        /// Held `resource:action` permission, or `*` for every permission
        #[arg(long = "held", required = true)]
        held: Vec<String>,

        /// Required `resource:action` permission
        #[arg(long)]
        require: String,
    },
}

#[derive(Tabled, Serialize)]
struct DescriptorRow {
    #[tabled(rename = "Descriptor")]
    descriptor: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl DescriptorRow {
    fn parse(descriptor: &str) -> Self {
        match parse_descriptor(descriptor) {
            Ok(parsed) => Self {
                descriptor: descriptor.to_string(),
                resource: parsed.resource,
                action: parsed.action.to_string(),
                scope: parsed.scope.to_string(),
                error: String::new(),
            },
            Err(e) => Self {
                descriptor: descriptor.to_string(),
                resource: String::new(),
                action: String::new(),
                scope: String::new(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct CheckResult {
    required: String,
    allowed: bool,
    matched_by: Option<String>,
}

pub fn execute(cmd: PermissionCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        PermissionCommands::Parse { descriptors } => {
            let rows: Vec<DescriptorRow> = descriptors.iter().map(|d| DescriptorRow::parse(d)).collect();
            output::print_list(&rows, format)?;

            let invalid = rows.iter().filter(|r| !r.error.is_empty()).count();
            if invalid > 0 {
                bail!("{} of {} descriptors are invalid", invalid, rows.len());
            }
        }

        PermissionCommands::Check { held, require } => {
            let Some(required) = GrantedPermission::parse(&require).filter(|p| !p.is_wildcard()) else {
                bail!("--require must be resource:action, got: {}", require);
            };

            let mut granted = Vec::with_capacity(held.len());
            for entry in &held {
                match GrantedPermission::parse(entry) {
                    Some(p) => granted.push(p),
                    None => bail!("--held must be resource:action, got: {}", entry),
                }
            }

            let matched_by = granted
                .iter()
                .find(|p| p.covers(&required.resource, &required.action))
                .map(GrantedPermission::as_string);
            let result = CheckResult {
                required: required.as_string(),
                allowed: matched_by.is_some(),
                matched_by,
            };

            match format {
                OutputFormat::Table => match &result.matched_by {
                    Some(by) => output::print_success(&format!("{} granted by {}", result.required, by)),
                    None => output::print_error(&format!("{} is not granted", result.required)),
                },
                OutputFormat::Json => output::print_item(&result)?,
            }
        }
    }

    Ok(())
}
