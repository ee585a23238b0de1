//! Token commands.
//!
//! Issues and inspects identity tokens signed with the shared secret the
//! server validates against.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use warden_core::middleware::{ttl_from_hours, Claims, TokenAuthenticator, MAX_TOKEN_TTL_HOURS};
use warden_core::rbac::{OrganizationId, UserId};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SecretArgs {
    /// Shared signing secret
    #[arg(long, env = "WARDEN_JWT_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a signed token for a user
    Issue {
        #[command(flatten)]
        secret: SecretArgs,

        /// User id (24 hex characters)
        #[arg(long)]
        user: String,

        /// Role name embedded in the token
        #[arg(long)]
        role: String,

        /// Organization id (24 hex characters)
        #[arg(long)]
        org: Option<String>,

        /// Validity window in hours
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },

    /// Validate a token and show its claims
    Inspect {
        #[command(flatten)]
        secret: SecretArgs,

        /// The token to inspect
        token: String,
    },
}

#[derive(Serialize)]
struct IssuedToken {
    token: String,
    expires_at: Option<String>,
}

#[derive(Serialize)]
struct InspectedToken<'a> {
    valid: bool,
    claims: &'a Claims,
    issued_at: Option<String>,
    expires_at: Option<String>,
}

fn authenticator(secret: &SecretArgs) -> Result<TokenAuthenticator> {
    if secret.secret.trim().is_empty() {
        bail!("a signing secret is required (--secret or WARDEN_JWT_SECRET)");
    }
    Ok(TokenAuthenticator::new(&secret.secret))
}

pub fn execute(cmd: TokenCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        TokenCommands::Issue {
            secret,
            user,
            role,
            org,
            ttl_hours,
        } => {
            let Some(ttl) = ttl_from_hours(ttl_hours) else {
                bail!("--ttl-hours must be between 1 and {}", MAX_TOKEN_TTL_HOURS);
            };
            if role.trim().is_empty() {
                bail!("--role must not be empty");
            }
            let user_id = UserId::parse(&user).context("--user must be a 24 character hex id")?;
            let org_id = org
                .as_deref()
                .map(OrganizationId::parse)
                .transpose()
                .context("--org must be a 24 character hex id")?;

            let authenticator = authenticator(&secret)?.with_ttl(ttl);
            let token = authenticator.generate_token(user_id, &role, org_id)?;
            let expires_at = authenticator
                .validate_token(&token)?
                .expires_at()
                .map(|t| t.to_rfc3339());

            match format {
                OutputFormat::Table => println!("{}", token),
                OutputFormat::Json => output::print_item(&IssuedToken { token, expires_at })?,
            }
        }

        TokenCommands::Inspect { secret, token } => {
            let claims = authenticator(&secret)?
                .validate_token(token.trim())
                .context("token rejected")?;
            let issued_at = claims.issued_at().map(|t| t.to_rfc3339());
            let expires_at = claims.expires_at().map(|t| t.to_rfc3339());

            match format {
                OutputFormat::Table => {
                    output::print_header("Token");
                    output::print_detail("User", &claims.user_id);
                    output::print_detail("Role", &claims.role);
                    output::print_detail(
                        "Organization",
                        claims.organization_id.as_deref().unwrap_or("-"),
                    );
                    output::print_detail("Issued", issued_at.as_deref().unwrap_or("-"));
                    output::print_detail("Expires", expires_at.as_deref().unwrap_or("-"));
                    println!();
                    output::print_success("Token is valid");
                }
                OutputFormat::Json => output::print_item(&InspectedToken {
                    valid: true,
                    claims: &claims,
                    issued_at,
                    expires_at,
                })?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(ttl_hours: i64) -> Result<()> {
        execute(
            TokenCommands::Issue {
                secret: SecretArgs {
                    secret: "cli-test-secret".to_string(),
                },
                user: "507f1f77bcf86cd799439011".to_string(),
                role: "VIEWER".to_string(),
                org: None,
                ttl_hours,
            },
            OutputFormat::Json,
        )
    }

    #[test]
    fn test_issue_rejects_out_of_range_ttl() {
        assert!(issue(24).is_ok());
        assert!(issue(0).is_err());
        assert!(issue(MAX_TOKEN_TTL_HOURS + 1).is_err());
        assert!(issue(i64::MAX).is_err());
    }
}
