//! Postgres-backed authorization store.
//!
//! ## Tenant Isolation
//!
//! Every query on a tenant-partitioned table carries `root_org_id` in its
//! WHERE clause, so a row can never be served across the boundary.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Backend` |
//! | Other | N/A | `Backend` |
//!
//! ## Atomicity
//!
//! Scope re-parenting, the scope cascade and versioned permission
//! replacement run inside one transaction each; everything else is a single
//! statement. Both scope-tree transactions first lock the tenant's scope rows,
//! so a cycle check and the write it guards see the same tree.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use scopegate_auth::{
    AssignmentStore, Org, OrgStore, Permission, PermissionSource, PermissionStore, Role, RoleStore,
    Scope, ScopeStore, StoreError, StoreResult, User, UserScopeAssignment, UserStore,
};
use scopegate_core::{OrgId, PermissionId, RoleId, ScopeId, UserId};

const SCHEMA: &str = include_str!("../../migrations/0001_authz.sql");

/// Bound on the ancestor walk in `update_scope`.
const MAX_SCOPE_DEPTH: i32 = 10_000;

#[derive(Debug, Clone)]
pub struct PostgresAuthzStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthzStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connection", "connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the schema if it does not exist yet. Safe to run on every start.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("schema", "migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl OrgStore for PostgresAuthzStore {
    async fn get_org(&self, id: OrgId) -> StoreResult<Option<Org>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, parent_org_id, root_org_id, user_limit, active, created_at
            FROM orgs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("org", "get_org", e))?;
        row.map(|r| decode::<OrgRow>("org", &r)).transpose()
    }

    async fn insert_org(&self, org: Org) -> StoreResult<Org> {
        sqlx::query(
            r#"
            INSERT INTO orgs (id, name, parent_org_id, root_org_id, user_limit, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(&org.name)
        .bind(org.parent_org_id.map(Uuid::from))
        .bind(org.root_org_id.as_uuid())
        .bind(org.user_limit.map(i64::from))
        .bind(org.active)
        .bind(org.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("org", "insert_org", e))?;
        Ok(org)
    }

    async fn update_org(&self, org: Org) -> StoreResult<Org> {
        let done = sqlx::query(
            r#"
            UPDATE orgs SET name = $2, user_limit = $3, active = $4
            WHERE id = $1
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(&org.name)
        .bind(org.user_limit.map(i64::from))
        .bind(org.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("org", "update_org", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("org", org.id));
        }
        Ok(org)
    }

    async fn list_child_orgs(&self, parent: OrgId) -> StoreResult<Vec<Org>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, parent_org_id, root_org_id, user_limit, active, created_at
            FROM orgs
            WHERE parent_org_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(parent.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("org", "list_child_orgs", e))?;
        decode_all::<OrgRow, _>("org", &rows)
    }

    async fn list_root_orgs(&self) -> StoreResult<Vec<Org>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, parent_org_id, root_org_id, user_limit, active, created_at
            FROM orgs
            WHERE id = root_org_id
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("org", "list_root_orgs", e))?;
        decode_all::<OrgRow, _>("org", &rows)
    }
}

#[async_trait]
impl UserStore for PostgresAuthzStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, root_org_id, email, display_name, active, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user", "get_user", e))?;
        row.map(|r| decode::<UserRow>("user", &r)).transpose()
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, org_id, root_org_id, email, display_name, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(user.org_id.as_uuid())
        .bind(user.root_org_id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.active)
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user", "insert_user", e))?;
        Ok(user)
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let done = sqlx::query(
            r#"
            UPDATE users SET email = $2, display_name = $3, active = $4
            WHERE id = $1
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user", "update_user", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user.id));
        }
        Ok(user)
    }

    async fn count_active_users(&self, org: OrgId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE org_id = $1 AND active",
        )
        .bind(org.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user", "count_active_users", e))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ScopeStore for PostgresAuthzStore {
    async fn list_scopes(&self, tenant: OrgId) -> StoreResult<Vec<Scope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, root_org_id, org_id, parent_id, name, level_label, created_at, changed_at
            FROM scopes
            WHERE root_org_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scope", "list_scopes", e))?;
        decode_all::<ScopeRow, _>("scope", &rows)
    }

    async fn get_scope(&self, tenant: OrgId, id: ScopeId) -> StoreResult<Option<Scope>> {
        let row = sqlx::query(
            r#"
            SELECT id, root_org_id, org_id, parent_id, name, level_label, created_at, changed_at
            FROM scopes
            WHERE root_org_id = $1 AND id = $2
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scope", "get_scope", e))?;
        row.map(|r| decode::<ScopeRow>("scope", &r)).transpose()
    }

    async fn insert_scope(&self, scope: Scope) -> StoreResult<Scope> {
        // The parent FK is not tenant-scoped, so the parent is matched here.
        let done = sqlx::query(
            r#"
            INSERT INTO scopes (id, root_org_id, org_id, parent_id, name, level_label, created_at, changed_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE $4::uuid IS NULL
               OR EXISTS (SELECT 1 FROM scopes WHERE id = $4 AND root_org_id = $2)
            "#,
        )
        .bind(scope.id.as_uuid())
        .bind(scope.root_org_id.as_uuid())
        .bind(scope.org_id.as_uuid())
        .bind(scope.parent_id.map(Uuid::from))
        .bind(&scope.name)
        .bind(&scope.level_label)
        .bind(scope.created_at)
        .bind(scope.changed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scope", "insert_scope", e))?;
        if done.rows_affected() == 0 {
            if let Some(parent) = scope.parent_id {
                return Err(StoreError::not_found("scope", parent));
            }
        }
        Ok(scope)
    }

    #[instrument(skip(self, scope), fields(tenant = %scope.root_org_id, scope_id = %scope.id), err)]
    async fn update_scope(&self, scope: Scope) -> StoreResult<Scope> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("scope", "begin_transaction", e))?;
        lock_tenant_scopes(&mut tx, scope.root_org_id).await?;

        if let Some(parent) = scope.parent_id {
            // Walk up from the new parent; the depth cap stops on a pre-existing loop.
            let row = sqlx::query(
                r#"
                WITH RECURSIVE up (id, parent_id, depth) AS (
                    SELECT id, parent_id, 1 FROM scopes WHERE root_org_id = $1 AND id = $2
                    UNION ALL
                    SELECT s.id, s.parent_id, up.depth + 1
                    FROM scopes s JOIN up ON s.id = up.parent_id
                    WHERE s.root_org_id = $1 AND up.depth < $4
                )
                SELECT
                    EXISTS (SELECT 1 FROM up WHERE depth = 1) AS parent_found,
                    EXISTS (SELECT 1 FROM up WHERE id = $3) AS closes_cycle
                "#,
            )
            .bind(scope.root_org_id.as_uuid())
            .bind(parent.as_uuid())
            .bind(scope.id.as_uuid())
            .bind(MAX_SCOPE_DEPTH)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("scope", "check_ancestry", e))?;

            let parent_found: bool = row
                .try_get("parent_found")
                .map_err(|e| map_sqlx_error("scope", "check_ancestry", e))?;
            let closes_cycle: bool = row
                .try_get("closes_cycle")
                .map_err(|e| map_sqlx_error("scope", "check_ancestry", e))?;
            if !parent_found {
                return Err(StoreError::not_found("scope", parent));
            }
            if closes_cycle {
                return Err(StoreError::Integrity {
                    scope_id: scope.id,
                    reason: format!("new parent {parent} is the scope itself or a descendant"),
                });
            }
        }

        let done = sqlx::query(
            r#"
            UPDATE scopes SET parent_id = $3, name = $4, level_label = $5, changed_at = $6
            WHERE root_org_id = $1 AND id = $2
            "#,
        )
        .bind(scope.root_org_id.as_uuid())
        .bind(scope.id.as_uuid())
        .bind(scope.parent_id.map(Uuid::from))
        .bind(&scope.name)
        .bind(&scope.level_label)
        .bind(scope.changed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("scope", "update_scope", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("scope", scope.id));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("scope", "commit_transaction", e))?;
        Ok(scope)
    }

    #[instrument(skip(self, ids), fields(tenant = %tenant, scope_count = ids.len()), err)]
    async fn delete_scopes_cascade(&self, tenant: OrgId, ids: &[ScopeId]) -> StoreResult<u64> {
        let span = Span::current();
        span.record("operation", "delete_scopes_cascade");

        let ids = uuid_array(ids);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("scope", "begin_transaction", e))?;
        lock_tenant_scopes(&mut tx, tenant).await?;

        // Assignments first so the revoked count is exact. Rows added under
        // a doomed scope before the lock are caught by the FK cascade.
        let revoked = sqlx::query(
            r#"
            DELETE FROM user_scope_assignments a
            USING scopes s
            WHERE a.scope_id = s.id AND s.root_org_id = $1 AND s.id = ANY($2)
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("scope", "delete_assignments", e))?
        .rows_affected();

        sqlx::query("DELETE FROM scopes WHERE root_org_id = $1 AND id = ANY($2)")
            .bind(tenant.as_uuid())
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("scope", "delete_scopes", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("scope", "commit_transaction", e))?;
        Ok(revoked)
    }
}

#[async_trait]
impl AssignmentStore for PostgresAuthzStore {
    async fn list_scope_assignments(&self, user: UserId) -> StoreResult<Vec<UserScopeAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, scope_id, scope_level, granted_at
            FROM user_scope_assignments
            WHERE user_id = $1
            ORDER BY granted_at, scope_id
            "#,
        )
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scope assignment", "list_scope_assignments", e))?;
        decode_all::<AssignmentRow, _>("scope assignment", &rows)
    }

    async fn upsert_scope_assignment(
        &self,
        assignment: UserScopeAssignment,
    ) -> StoreResult<UserScopeAssignment> {
        sqlx::query(
            r#"
            INSERT INTO user_scope_assignments (user_id, scope_id, scope_level, granted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, scope_id)
            DO UPDATE SET scope_level = EXCLUDED.scope_level
            "#,
        )
        .bind(assignment.user_id.as_uuid())
        .bind(assignment.scope_id.as_uuid())
        .bind(&assignment.scope_level)
        .bind(assignment.granted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scope assignment", "upsert_scope_assignment", e))?;
        Ok(assignment)
    }

    async fn delete_scope_assignment(&self, user: UserId, scope: ScopeId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM user_scope_assignments WHERE user_id = $1 AND scope_id = $2")
            .bind(user.as_uuid())
            .bind(scope.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("scope assignment", "delete_scope_assignment", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_user_roles(&self, user: UserId) -> StoreResult<Vec<RoleId>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT role_id FROM user_roles WHERE user_id = $1 ORDER BY role_id")
                .bind(user.as_uuid())
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("role membership", "list_user_roles", e))?;
        Ok(ids.into_iter().map(RoleId::from_uuid).collect())
    }

    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user.as_uuid())
        .bind(role.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role membership", "add_user_role", e))?;
        Ok(())
    }

    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user.as_uuid())
            .bind(role.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role membership", "remove_user_role", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn replace_user_roles(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        let roles = uuid_array(roles);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("role membership", "begin_transaction", e))?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("role membership", "clear_user_roles", e))?;
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, r FROM UNNEST($2::uuid[]) AS r
            "#,
        )
        .bind(user.as_uuid())
        .bind(&roles)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role membership", "insert_user_roles", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("role membership", "commit_transaction", e))?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user: UserId) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("grant", "begin_transaction", e))?;
        let scopes = sqlx::query("DELETE FROM user_scope_assignments WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("grant", "revoke_scopes", e))?
            .rows_affected();
        let roles = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("grant", "revoke_roles", e))?
            .rows_affected();
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("grant", "commit_transaction", e))?;
        Ok(scopes + roles)
    }
}

#[async_trait]
impl RoleStore for PostgresAuthzStore {
    async fn list_roles(&self, tenant: OrgId) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(
            r#"
            SELECT id, root_org_id, name, description, permissions, version, created_at, changed_at
            FROM roles
            WHERE root_org_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", "list_roles", e))?;
        decode_all::<RoleRow, _>("role", &rows)
    }

    async fn get_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query(
            r#"
            SELECT id, root_org_id, name, description, permissions, version, created_at, changed_at
            FROM roles
            WHERE root_org_id = $1 AND id = $2
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", "get_role", e))?;
        row.map(|r| decode::<RoleRow>("role", &r)).transpose()
    }

    async fn insert_role(&self, role: Role) -> StoreResult<Role> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, root_org_id, name, description, permissions, version, created_at, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.root_org_id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.permissions.iter().cloned().collect::<Vec<String>>())
        .bind(role.version as i64)
        .bind(role.created_at)
        .bind(role.changed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", "insert_role", e))?;
        Ok(role)
    }

    async fn update_role(&self, role: Role) -> StoreResult<Role> {
        let row = sqlx::query(
            r#"
            UPDATE roles SET name = $3, description = $4, changed_at = $5
            WHERE root_org_id = $1 AND id = $2
            RETURNING id, root_org_id, name, description, permissions, version, created_at, changed_at
            "#,
        )
        .bind(role.root_org_id.as_uuid())
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.changed_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", "update_role", e))?;
        match row {
            Some(r) => decode::<RoleRow>("role", &r),
            None => Err(StoreError::not_found("role", role.id)),
        }
    }

    #[instrument(skip(self, permissions), fields(role_id = %id, expected_version = ?expected_version), err)]
    async fn replace_role_permissions(
        &self,
        tenant: OrgId,
        id: RoleId,
        permissions: BTreeSet<String>,
        expected_version: Option<u64>,
    ) -> StoreResult<Role> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("role", "begin_transaction", e))?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM roles WHERE root_org_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role", "lock_role", e))?;

        let Some(current) = current else {
            return Err(StoreError::not_found("role", id));
        };
        if let Some(expected) = expected_version {
            if expected as i64 != current {
                return Err(StoreError::VersionConflict {
                    entity: "role",
                    id: id.to_string(),
                    expected,
                    found: current.max(0) as u64,
                });
            }
        }

        let row = sqlx::query(
            r#"
            UPDATE roles SET permissions = $3, version = version + 1, changed_at = NOW()
            WHERE root_org_id = $1 AND id = $2
            RETURNING id, root_org_id, name, description, permissions, version, created_at, changed_at
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .bind(permissions.into_iter().collect::<Vec<String>>())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role", "replace_role_permissions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("role", "commit_transaction", e))?;
        decode::<RoleRow>("role", &row)
    }

    async fn delete_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<bool> {
        // Memberships go with the role (ON DELETE CASCADE).
        let done = sqlx::query("DELETE FROM roles WHERE root_org_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role", "delete_role", e))?;
        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl PermissionStore for PostgresAuthzStore {
    async fn list_permissions(&self, tenant: OrgId) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description
            FROM permissions
            WHERE root_org_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission", "list_permissions", e))?;
        decode_all::<PermissionRow, _>("permission", &rows)
    }

    async fn insert_permission(
        &self,
        tenant: OrgId,
        mut permission: Permission,
    ) -> StoreResult<Permission> {
        let id = *permission.id.get_or_insert_with(PermissionId::new);
        permission.source = PermissionSource::Database;
        sqlx::query(
            "INSERT INTO permissions (id, root_org_id, name, description) VALUES ($1, $2, $3, $4)",
        )
        .bind(id.as_uuid())
        .bind(tenant.as_uuid())
        .bind(&permission.name)
        .bind(&permission.description)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission", "insert_permission", e))?;
        Ok(permission)
    }

    async fn update_permission(
        &self,
        tenant: OrgId,
        permission: Permission,
    ) -> StoreResult<Permission> {
        let id = permission
            .id
            .ok_or_else(|| StoreError::not_found("permission", &permission.name))?;
        let row = sqlx::query(
            r#"
            UPDATE permissions SET description = $3
            WHERE root_org_id = $1 AND id = $2
            RETURNING id, name, description
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .bind(&permission.description)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission", "update_permission", e))?;
        match row {
            Some(r) => decode::<PermissionRow>("permission", &r),
            None => Err(StoreError::not_found("permission", id)),
        }
    }

    async fn delete_permission(&self, tenant: OrgId, id: PermissionId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM permissions WHERE root_org_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("permission", "delete_permission", e))?;
        Ok(done.rows_affected() > 0)
    }
}

/// Serializes scope-tree writes for one tenant until the transaction ends.
async fn lock_tenant_scopes(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant: OrgId,
) -> StoreResult<()> {
    sqlx::query("SELECT id FROM scopes WHERE root_org_id = $1 FOR UPDATE")
        .bind(tenant.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("scope", "lock_scopes", e))?;
    Ok(())
}

/// Ids as a `UUID[]` bind value.
fn uuid_array<T>(ids: &[T]) -> Vec<Uuid>
where
    T: Copy + Into<Uuid>,
{
    ids.iter().copied().map(Into::into).collect()
}

fn map_sqlx_error(entity: &'static str, operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate { entity, key: msg },
                Some("23503") => StoreError::NotFound { entity, id: msg },
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode<'r, R>(entity: &'static str, row: &'r PgRow) -> StoreResult<R::Model>
where
    R: FromRow<'r, PgRow> + IntoModel,
{
    R::from_row(row)
        .map(IntoModel::into_model)
        .map_err(|e| StoreError::backend(format!("failed to decode {entity} row: {e}")))
}

fn decode_all<'r, R, M>(entity: &'static str, rows: &'r [PgRow]) -> StoreResult<Vec<M>>
where
    R: FromRow<'r, PgRow> + IntoModel<Model = M>,
{
    rows.iter().map(|r| decode::<R>(entity, r)).collect()
}

// SQLx row types

trait IntoModel {
    type Model;
    fn into_model(self) -> Self::Model;
}

#[derive(Debug)]
struct OrgRow {
    id: Uuid,
    name: String,
    parent_org_id: Option<Uuid>,
    root_org_id: Uuid,
    user_limit: Option<i64>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for OrgRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrgRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            parent_org_id: row.try_get("parent_org_id")?,
            root_org_id: row.try_get("root_org_id")?,
            user_limit: row.try_get("user_limit")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl IntoModel for OrgRow {
    type Model = Org;

    fn into_model(self) -> Org {
        Org {
            id: OrgId::from_uuid(self.id),
            name: self.name,
            parent_org_id: self.parent_org_id.map(OrgId::from_uuid),
            root_org_id: OrgId::from_uuid(self.root_org_id),
            user_limit: self.user_limit.map(|l| u32::try_from(l).unwrap_or(u32::MAX)),
            active: self.active,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    org_id: Uuid,
    root_org_id: Uuid,
    email: String,
    display_name: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            root_org_id: row.try_get("root_org_id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl IntoModel for UserRow {
    type Model = User;

    fn into_model(self) -> User {
        User {
            id: UserId::from_uuid(self.id),
            org_id: OrgId::from_uuid(self.org_id),
            root_org_id: OrgId::from_uuid(self.root_org_id),
            email: self.email,
            display_name: self.display_name,
            active: self.active,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug)]
struct ScopeRow {
    id: Uuid,
    root_org_id: Uuid,
    org_id: Uuid,
    parent_id: Option<Uuid>,
    name: String,
    level_label: String,
    created_at: DateTime<Utc>,
    changed_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ScopeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ScopeRow {
            id: row.try_get("id")?,
            root_org_id: row.try_get("root_org_id")?,
            org_id: row.try_get("org_id")?,
            parent_id: row.try_get("parent_id")?,
            name: row.try_get("name")?,
            level_label: row.try_get("level_label")?,
            created_at: row.try_get("created_at")?,
            changed_at: row.try_get("changed_at")?,
        })
    }
}

impl IntoModel for ScopeRow {
    type Model = Scope;

    fn into_model(self) -> Scope {
        Scope {
            id: ScopeId::from_uuid(self.id),
            name: self.name,
            level_label: self.level_label,
            parent_id: self.parent_id.map(ScopeId::from_uuid),
            org_id: OrgId::from_uuid(self.org_id),
            root_org_id: OrgId::from_uuid(self.root_org_id),
            created_at: self.created_at,
            changed_at: self.changed_at,
        }
    }
}

#[derive(Debug)]
struct AssignmentRow {
    user_id: Uuid,
    scope_id: Uuid,
    scope_level: String,
    granted_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AssignmentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AssignmentRow {
            user_id: row.try_get("user_id")?,
            scope_id: row.try_get("scope_id")?,
            scope_level: row.try_get("scope_level")?,
            granted_at: row.try_get("granted_at")?,
        })
    }
}

impl IntoModel for AssignmentRow {
    type Model = UserScopeAssignment;

    fn into_model(self) -> UserScopeAssignment {
        UserScopeAssignment {
            user_id: UserId::from_uuid(self.user_id),
            scope_id: ScopeId::from_uuid(self.scope_id),
            scope_level: self.scope_level,
            granted_at: self.granted_at,
        }
    }
}

#[derive(Debug)]
struct RoleRow {
    id: Uuid,
    root_org_id: Uuid,
    name: String,
    description: String,
    permissions: Vec<String>,
    version: i64,
    created_at: DateTime<Utc>,
    changed_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            root_org_id: row.try_get("root_org_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            permissions: row.try_get("permissions")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            changed_at: row.try_get("changed_at")?,
        })
    }
}

impl IntoModel for RoleRow {
    type Model = Role;

    fn into_model(self) -> Role {
        Role {
            id: RoleId::from_uuid(self.id),
            root_org_id: OrgId::from_uuid(self.root_org_id),
            name: self.name,
            description: self.description,
            permissions: self.permissions.into_iter().collect(),
            version: self.version.max(0) as u64,
            created_at: self.created_at,
            changed_at: self.changed_at,
        }
    }
}

#[derive(Debug)]
struct PermissionRow {
    id: Uuid,
    name: String,
    description: String,
}

impl<'r> FromRow<'r, PgRow> for PermissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PermissionRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }
}

impl IntoModel for PermissionRow {
    type Model = Permission;

    fn into_model(self) -> Permission {
        Permission {
            id: Some(PermissionId::from_uuid(self.id)),
            name: self.name,
            description: self.description,
            source: PermissionSource::Database,
        }
    }
}
