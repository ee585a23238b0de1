//! PostgreSQL store using sqlx runtime queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;

use super::{PermissionStore, RoleStore, StoreError, StoreResult, UserStore};
use crate::rbac::filter::ScopeFilter;
use crate::rbac::models::{
    OrganizationId, Permission, PermissionId, Role, RoleId, Scope, User, UserId,
};

const ROLE_COLUMNS: &str = "id, name, description, scope, permission_ids, is_system, \
     organization_id, created_by, created_at, updated_at, deleted_at";

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, role_id, role, organization_id, deleted_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl RoleStore for PgStore {
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Role::try_from).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Role::try_from).transpose()
    }

    async fn list_roles(&self, filter: &ScopeFilter) -> StoreResult<Vec<Role>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE deleted_at IS NULL AND "
        ));
        filter.push_sql(&mut qb, "created_by", "organization_id");
        qb.push(" ORDER BY created_at, id");

        let rows = qb
            .build_query_as::<RoleRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Role::try_from).collect()
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, scope, permission_ids, is_system,
                               organization_id, created_by, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(role.id.to_hex())
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.scope)
        .bind(&role.permission_ids)
        .bind(role.is_system)
        .bind(role.organization_id.map(|o| o.to_hex()))
        .bind(role.created_by.map(|u| u.to_hex()))
        .bind(role.created_at)
        .bind(role.updated_at)
        .bind(role.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(format!("role name {}", role.name))
            }
            other => StoreError::Database(other),
        })?;

        Ok(())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, scope = $4, permission_ids = $5,
                organization_id = $6, updated_at = $7, deleted_at = $8
            WHERE id = $1
            "#,
        )
        .bind(role.id.to_hex())
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.scope)
        .bind(&role.permission_ids)
        .bind(role.organization_id.map(|o| o.to_hex()))
        .bind(role.updated_at)
        .bind(role.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(format!("role name {}", role.name))
            }
            other => StoreError::Database(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("role {}", role.id)));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Catalog
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl PermissionStore for PgStore {
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, resource, action, scope, description FROM permissions WHERE id = $1",
        )
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Permission::try_from).transpose()
    }

    async fn find_by_descriptor(
        &self,
        resource: &str,
        action: &str,
        scope: Scope,
    ) -> StoreResult<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, resource, action, scope, description
            FROM permissions
            WHERE resource = $1 AND action = $2 AND scope = $3
            "#,
        )
        .bind(resource)
        .bind(action)
        .bind(scope.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Permission::try_from).transpose()
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, resource, action, scope, description FROM permissions ORDER BY resource, action",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Permission::try_from).collect()
    }

    async fn list_permissions_by_resource(&self, resource: &str) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, resource, action, scope, description
            FROM permissions
            WHERE resource = $1
            ORDER BY action
            "#,
        )
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Permission::try_from).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    role_id: String,
    role: String,
    organization_id: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: String,
    name: String,
    description: String,
    scope: String,
    permission_ids: Vec<String>,
    is_system: bool,
    organization_id: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: String,
    resource: String,
    action: String,
    scope: Option<String>,
    description: String,
}

fn parse_column<T: std::str::FromStr>(
    table: &'static str,
    row_id: &str,
    column: &str,
    value: &str,
) -> StoreResult<T> {
    value.parse().map_err(|_| StoreError::Corrupt {
        table,
        id: row_id.to_string(),
        reason: format!("{column} is not an object id: {value:?}"),
    })
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        let organization_id = row
            .organization_id
            .as_deref()
            .map(|v| parse_column::<OrganizationId>("users", &row.id, "organization_id", v))
            .transpose()?;

        Ok(User {
            id: parse_column("users", &row.id, "id", &row.id)?,
            role_id: row.role_id,
            role: row.role,
            organization_id,
            deleted_at: row.deleted_at,
        })
    }
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> StoreResult<Self> {
        let organization_id = row
            .organization_id
            .as_deref()
            .map(|v| parse_column::<OrganizationId>("roles", &row.id, "organization_id", v))
            .transpose()?;
        let created_by = row
            .created_by
            .as_deref()
            .map(|v| parse_column::<UserId>("roles", &row.id, "created_by", v))
            .transpose()?;

        Ok(Role {
            id: parse_column("roles", &row.id, "id", &row.id)?,
            name: row.name,
            description: row.description,
            scope: row.scope,
            permission_ids: row.permission_ids,
            is_system: row.is_system,
            organization_id,
            created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

impl TryFrom<PermissionRow> for Permission {
    type Error = StoreError;

    fn try_from(row: PermissionRow) -> StoreResult<Self> {
        Ok(Permission {
            id: parse_column("permissions", &row.id, "id", &row.id)?,
            scope: row.scope.as_deref().and_then(Scope::parse),
            resource: row.resource,
            action: row.action,
            description: row.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_row(id: &str) -> RoleRow {
        let now = Utc::now();
        RoleRow {
            id: id.to_string(),
            name: "Manager".into(),
            description: String::new(),
            scope: "organization".into(),
            permission_ids: vec!["not-hex".into()],
            is_system: false,
            organization_id: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_role_row_keeps_raw_permission_ids() {
        let role = Role::try_from(role_row("507f1f77bcf86cd799439011")).unwrap();
        assert_eq!(role.permission_ids, vec!["not-hex".to_string()]);
        assert_eq!(role.scope_level(), Some(Scope::Organization));
    }

    #[test]
    fn test_role_row_with_bad_id_is_corrupt() {
        let err = Role::try_from(role_row("42")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "roles", .. }));
    }

    #[test]
    fn test_permission_row_unknown_scope_is_none() {
        let perm = Permission::try_from(PermissionRow {
            id: "507f1f77bcf86cd799439011".into(),
            resource: "reports".into(),
            action: "export".into(),
            scope: Some("tenant".into()),
            description: String::new(),
        })
        .unwrap();
        assert!(perm.scope.is_none());
    }
}
