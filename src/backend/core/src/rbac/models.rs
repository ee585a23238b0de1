//! RBAC data models: identifiers, scopes, catalog permissions, roles and users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned when a string is not a valid 24-character hex object id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id: {0:?}")]
pub struct InvalidObjectId(pub String);

/// A 12-byte identifier rendered as 24 lowercase hex characters.
///
/// The first four bytes carry the creation time in seconds (big endian), the
/// remaining eight are random.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&Uuid::new_v4().as_bytes()[..8]);
        Self(bytes)
    }

    /// Parse a 24-character hex string. Upper case hex is accepted.
    pub fn parse_str(s: &str) -> Result<Self, InvalidObjectId> {
        if s.len() != 24 {
            return Err(InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_str(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub ObjectId);

        impl $name {
            pub fn new() -> Self {
                Self(ObjectId::new())
            }

            pub fn parse(s: &str) -> Result<Self, InvalidObjectId> {
                ObjectId::parse_str(s).map(Self)
            }

            pub fn object_id(&self) -> ObjectId {
                self.0
            }

            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = InvalidObjectId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<ObjectId> for $name {
            fn from(id: ObjectId) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(
    /// Strongly-typed user identifier.
    UserId
);
typed_id!(
    /// Strongly-typed role identifier.
    RoleId
);
typed_id!(
    /// Strongly-typed organization identifier.
    OrganizationId
);
typed_id!(
    /// Strongly-typed catalog permission identifier.
    PermissionId
);

// ═══════════════════════════════════════════════════════════════════════════════
// Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// Breadth of data visibility granted by a role.
///
/// Variants are declared in rank order so the derived `Ord` is the hierarchy
/// `self < organization < global`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Own records only. Serialized as `"self"`.
    #[serde(rename = "self")]
    Personal,
    Organization,
    Global,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Global, Scope::Organization, Scope::Personal];

    /// Numeric level used by the escalation checks.
    pub fn rank(self) -> u8 {
        match self {
            Scope::Personal => 1,
            Scope::Organization => 2,
            Scope::Global => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Personal => "self",
            Scope::Organization => "organization",
            Scope::Global => "global",
        }
    }

    /// Parse a persisted scope string. Matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "self" => Some(Scope::Personal),
            "organization" => Some(Scope::Organization),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

/// Actions accepted in a permission descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Write,
    Create,
    Update,
    Delete,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 5] = [
        PermissionAction::Read,
        PermissionAction::Write,
        PermissionAction::Create,
        PermissionAction::Update,
        PermissionAction::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionAction::Read => "read",
            PermissionAction::Write => "write",
            PermissionAction::Create => "create",
            PermissionAction::Update => "update",
            PermissionAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A catalog record: the persisted definition of one grantable permission.
///
/// `action` is kept as stored so that route verbs such as `list` or `restore`
/// can be catalogued next to the descriptor actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub resource: String,
    pub action: String,
    pub scope: Option<Scope>,
    pub description: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: PermissionId::new(),
            resource: resource.into(),
            action: action.into(),
            scope: None,
            description: String::new(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The caller-held form of this permission.
    pub fn grant(&self) -> GrantedPermission {
        GrantedPermission::new(&self.resource, &self.action)
    }

    /// `resource:action:scope`, when a scope is recorded.
    pub fn descriptor(&self) -> Option<String> {
        self.scope
            .map(|scope| format!("{}:{}:{}", self.resource, self.action, scope))
    }
}

/// A `resource:action` pair held by a caller through their role, or the
/// literal `"*"` which grants every permission.
///
/// `*` inside a pair is not a wildcard: `organizations:*` only satisfies a
/// requirement for the action named `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantedPermission {
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    wildcard: bool,
}

impl GrantedPermission {
    /// Held string granting everything.
    pub const WILDCARD: &'static str = "*";

    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            wildcard: false,
        }
    }

    /// The literal `"*"` grant.
    pub fn wildcard() -> Self {
        Self {
            resource: Self::WILDCARD.to_string(),
            action: Self::WILDCARD.to_string(),
            wildcard: true,
        }
    }

    /// Parse `"resource:action"` or the literal `"*"`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == Self::WILDCARD {
            return Some(Self::wildcard());
        }
        let (resource, action) = s.split_once(':')?;
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(resource, action))
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Exact comparison, no wildcards.
    pub fn is(&self, resource: &str, action: &str) -> bool {
        !self.wildcard && self.resource == resource && self.action == action
    }

    /// Exact comparison, or `true` for the literal `"*"` grant.
    pub fn covers(&self, resource: &str, action: &str) -> bool {
        self.wildcard || self.is(resource, action)
    }
}

impl fmt::Display for GrantedPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            f.write_str(Self::WILDCARD)
        } else {
            write!(f, "{}:{}", self.resource, self.action)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A named set of catalog permissions with a scope.
///
/// `scope` and `permission_ids` hold the values as persisted; they are parsed
/// at resolution time so that bad rows degrade instead of failing the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub scope: String,
    pub permission_ids: Vec<String>,
    pub is_system: bool,
    pub organization_id: Option<OrganizationId>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>, scope: Scope) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(),
            name: name.into(),
            description: description.into(),
            scope: scope.as_str().to_string(),
            permission_ids: Vec::new(),
            is_system: false,
            organization_id: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_permissions<'a>(mut self, ids: impl IntoIterator<Item = &'a PermissionId>) -> Self {
        self.permission_ids = ids.into_iter().map(PermissionId::to_hex).collect();
        self
    }

    /// Mark this as a system role (immutable through the management API).
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn with_organization(mut self, org_id: OrganizationId) -> Self {
        self.organization_id = Some(org_id);
        self
    }

    /// Parsed scope; `None` when the stored value is not a known scope.
    pub fn scope_level(&self) -> Option<Scope> {
        Scope::parse(&self.scope)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// User
// ═══════════════════════════════════════════════════════════════════════════════

/// The slice of a user record the resolver needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Role reference as persisted (hex).
    pub role_id: String,
    pub role: String,
    pub organization_id: Option<OrganizationId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(role: &Role) -> Self {
        Self {
            id: UserId::new(),
            role_id: role.id.to_hex(),
            role: role.name.clone(),
            organization_id: None,
            deleted_at: None,
        }
    }

    pub fn with_organization(mut self, org_id: OrganizationId) -> Self {
        self.organization_id = Some(org_id);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
