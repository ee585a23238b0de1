//! Request authentication and authorization middleware.
pub mod auth;
pub mod guard;

pub use auth::{
    extract_bearer, ttl_from_hours, Claims, TokenAuthenticator, TokenError, MAX_TOKEN_TTL_HOURS,
};
pub use guard::{
    validate_ownership, Guard, GuardConfig, GuardError, GuardLayer, GuardSettings, GuardStage,
    Requirement, DEFAULT_ADMIN_ROLE,
};
