//! Token authentication.
//!
//! Features:
//! - HMAC-signed identity tokens (HS256 issued, HS256/HS384/HS512 accepted)
//! - Algorithm check on the token header before signature verification
//! - Expiry re-checked against wall-clock time after decoding
//! - `Authorization: Bearer <token>` extraction
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::middleware::auth::TokenAuthenticator;
//!
//! let authenticator = TokenAuthenticator::new("your-secret-key");
//! let token = authenticator.generate_token(user_id, "ORG_ADMIN", Some(org_id))?;
//! let claims = authenticator.validate_token(&token)?;
//! ```

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use metrics::counter;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::rbac::models::{OrganizationId, UserId};
use crate::telemetry::logging::token_fingerprint;

/// Validity window of issued tokens.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Longest validity window accepted from configuration or the CLI.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 30;

/// `hours` as a validity window, if within `1..=MAX_TOKEN_TTL_HOURS`.
pub fn ttl_from_hours(hours: i64) -> Option<Duration> {
    (1..=MAX_TOKEN_TTL_HOURS)
        .contains(&hours)
        .then(|| Duration::hours(hours))
}

const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Token validation and signing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("unexpected signing method: {0}")]
    UnexpectedAlgorithm(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::UnexpectedAlgorithm(_) => "unexpected_algorithm",
            Self::Signing(_) => "signing",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnexpectedAlgorithm(e.to_string())
            }
            _ => Self::Malformed(e.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id as 24 hex characters.
    pub user_id: String,

    /// Role name at issuance.
    pub role: String,

    /// Organization id, omitted for users without one.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub organization_id: Option<String>,

    /// Expiration timestamp (seconds)
    pub exp: i64,

    /// Issued at timestamp (seconds)
    pub iat: i64,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl Claims {
    /// Claims issued now and valid for `ttl`.
    pub fn new(
        user_id: UserId,
        role: impl Into<String>,
        organization_id: Option<OrganizationId>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_hex(),
            role: role.into(),
            organization_id: organization_id.map(|o| o.to_hex()),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    /// A token whose `exp` is at or before `now` is expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

/// Issues and validates identity tokens signed with a shared secret.
pub struct TokenAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("algorithms", &self.validation.algorithms)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    /// Create an authenticator for `secret` with the default 24 hour window.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    /// Override the validity window of issued tokens.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Validate a token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        let result = self.decode_claims(token);

        match &result {
            Ok(claims) => {
                counter!("warden_token_validations_total", "outcome" => "valid").increment(1);
                debug!(token = %token_fingerprint(token), role = %claims.role, "Token validated");
            }
            Err(e) => {
                counter!("warden_token_validations_total", "outcome" => e.label()).increment(1);
                debug!(token = %token_fingerprint(token), error = %e, "Token rejected");
            }
        }

        result
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token)?;
        if !HMAC_ALGORITHMS.contains(&header.alg) {
            return Err(TokenError::UnexpectedAlgorithm(format!("{:?}", header.alg)));
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;

        if claims.is_expired_at(Utc::now()) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Issue an HS256 token for a user.
    pub fn generate_token(
        &self,
        user_id: UserId,
        role: &str,
        organization_id: Option<OrganizationId>,
    ) -> Result<String, TokenError> {
        self.sign(&Claims::new(user_id, role, organization_id, self.ttl))
    }

    /// Sign arbitrary claims with HS256.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Header Extraction
// ═══════════════════════════════════════════════════════════════════════════════

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The value must split on a single space into exactly two parts; the scheme
/// is compared case-insensitively.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
