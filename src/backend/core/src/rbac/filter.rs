//! Scope-based data access constraints.
//!
//! A [`ScopeFilter`] is computed from the caller's context and handed to
//! whatever query reads the protected resource. It renders three ways:
//! - a document-store constraint (`to_document`)
//! - a SQL predicate appended to a `sqlx::QueryBuilder` (`push_sql`)
//! - an in-memory predicate over a row's owner and organization (`allows`)

use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};

use super::context::AuthorizationContext;
use super::models::{OrganizationId, Scope, UserId};

/// Row-level constraint derived from the caller's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Global scope: no constraint.
    Unrestricted,
    /// Rows belonging to one organization.
    Organization(OrganizationId),
    /// Rows owned by the caller.
    Owner(UserId),
    /// Nothing is visible.
    MatchNone,
}

impl ScopeFilter {
    /// Compute the filter for reading `resource`.
    ///
    /// Without `resource:read` the result is always [`ScopeFilter::MatchNone`].
    pub fn for_context(ctx: &AuthorizationContext, resource: &str) -> Self {
        if !ctx.has_permission(resource, "read") {
            return Self::MatchNone;
        }

        match ctx.scope {
            Some(Scope::Global) => Self::Unrestricted,
            Some(Scope::Organization) => ctx
                .organization_id
                .map_or(Self::MatchNone, Self::Organization),
            Some(Scope::Personal) => Self::Owner(ctx.user_id),
            None => Self::MatchNone,
        }
    }

    pub fn matches_nothing(&self) -> bool {
        matches!(self, Self::MatchNone)
    }

    /// Document-store form. `MatchNone` becomes an `_id` test that no
    /// document satisfies.
    pub fn to_document(&self) -> Value {
        match self {
            Self::Unrestricted => json!({}),
            Self::Organization(org) => json!({ "organizationId": org.to_hex() }),
            Self::Owner(user) => json!({ "userId": user.to_hex() }),
            Self::MatchNone => json!({ "_id": { "$in": [] } }),
        }
    }

    /// Append this filter as a boolean SQL expression.
    pub fn push_sql<'args>(
        &self,
        qb: &mut QueryBuilder<'args, Postgres>,
        owner_column: &str,
        organization_column: &str,
    ) {
        match self {
            Self::Unrestricted => {
                qb.push("TRUE");
            }
            Self::Organization(org) => {
                qb.push(organization_column)
                    .push(" = ")
                    .push_bind(org.to_hex());
            }
            Self::Owner(user) => {
                qb.push(owner_column).push(" = ").push_bind(user.to_hex());
            }
            Self::MatchNone => {
                qb.push("FALSE");
            }
        }
    }

    /// Evaluate the filter against a row in memory.
    pub fn allows(&self, owner: Option<UserId>, organization: Option<OrganizationId>) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Organization(org) => organization == Some(*org),
            Self::Owner(user) => owner == Some(*user),
            Self::MatchNone => false,
        }
    }
}
