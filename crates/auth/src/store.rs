//! Persistence boundary.
//!
//! Every method is individually atomic. The only cross-table unit the core
//! relies on is [`ScopeStore::delete_scopes_cascade`]. Tenant-partitioned
//! tables take the tenant (root org) id explicitly so an implementation can
//! never serve a row across the boundary.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use scopegate_core::{OrgId, PermissionId, RoleId, ScopeId, UserId};

use crate::org::Org;
use crate::permissions::Permission;
use crate::principal::User;
use crate::roles::Role;
use crate::scope::{Scope, UserScopeAssignment};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("version conflict on {entity} {id}: expected {expected}, found {found}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    /// A write would have broken the scope tree (cycle or missing parent).
    #[error("scope tree integrity violated at {scope_id}: {reason}")]
    Integrity { scope_id: ScopeId, reason: String },

    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn get_org(&self, id: OrgId) -> StoreResult<Option<Org>>;
    async fn insert_org(&self, org: Org) -> StoreResult<Org>;
    async fn update_org(&self, org: Org) -> StoreResult<Org>;
    async fn list_child_orgs(&self, parent: OrgId) -> StoreResult<Vec<Org>>;
    async fn list_root_orgs(&self) -> StoreResult<Vec<Org>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;
    async fn insert_user(&self, user: User) -> StoreResult<User>;
    async fn update_user(&self, user: User) -> StoreResult<User>;
    async fn count_active_users(&self, org: OrgId) -> StoreResult<u64>;
}

#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn list_scopes(&self, tenant: OrgId) -> StoreResult<Vec<Scope>>;
    async fn get_scope(&self, tenant: OrgId, id: ScopeId) -> StoreResult<Option<Scope>>;

    /// Fails with `NotFound` when the parent does not exist in the tenant.
    async fn insert_scope(&self, scope: Scope) -> StoreResult<Scope>;

    /// The parent check and the cycle check run in the same atomic unit as
    /// the write: a new parent that is missing is `NotFound`, one below the
    /// scope itself is `Integrity`.
    async fn update_scope(&self, scope: Scope) -> StoreResult<Scope>;

    /// Remove `ids`, any descendants of them, and every assignment
    /// referencing those scopes as one unit.
    ///
    /// Returns the number of revoked assignments.
    async fn delete_scopes_cascade(&self, tenant: OrgId, ids: &[ScopeId]) -> StoreResult<u64>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn list_scope_assignments(&self, user: UserId) -> StoreResult<Vec<UserScopeAssignment>>;

    /// Insert or refresh a direct grant (one row per user/scope pair).
    async fn upsert_scope_assignment(
        &self,
        assignment: UserScopeAssignment,
    ) -> StoreResult<UserScopeAssignment>;

    async fn delete_scope_assignment(&self, user: UserId, scope: ScopeId) -> StoreResult<bool>;

    async fn list_user_roles(&self, user: UserId) -> StoreResult<Vec<RoleId>>;
    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()>;
    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<bool>;

    /// Full replacement of a user's role memberships.
    async fn replace_user_roles(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()>;

    /// Drop every scope grant and role membership of `user`.
    async fn revoke_all_for_user(&self, user: UserId) -> StoreResult<u64>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn list_roles(&self, tenant: OrgId) -> StoreResult<Vec<Role>>;
    async fn get_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<Option<Role>>;

    /// Fails with `Duplicate` when the name is taken inside the tenant.
    async fn insert_role(&self, role: Role) -> StoreResult<Role>;

    /// Update name and description only.
    async fn update_role(&self, role: Role) -> StoreResult<Role>;

    /// Full replacement of a role's permission set.
    ///
    /// With `expected_version` set, a mismatch fails with `VersionConflict`;
    /// without it the write is last-write-wins.
    async fn replace_role_permissions(
        &self,
        tenant: OrgId,
        id: RoleId,
        permissions: BTreeSet<String>,
        expected_version: Option<u64>,
    ) -> StoreResult<Role>;

    /// Delete the role and its user memberships.
    async fn delete_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<bool>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Database-sourced permissions of a tenant.
    async fn list_permissions(&self, tenant: OrgId) -> StoreResult<Vec<Permission>>;

    /// Fails with `Duplicate` when the name already exists in the tenant.
    async fn insert_permission(&self, tenant: OrgId, permission: Permission)
    -> StoreResult<Permission>;

    async fn update_permission(&self, tenant: OrgId, permission: Permission)
    -> StoreResult<Permission>;

    async fn delete_permission(&self, tenant: OrgId, id: PermissionId) -> StoreResult<bool>;
}

/// Everything the authorization core reads and writes.
pub trait AuthzStore:
    OrgStore + UserStore + ScopeStore + AssignmentStore + RoleStore + PermissionStore
{
}

impl<T> AuthzStore for T where
    T: OrgStore + UserStore + ScopeStore + AssignmentStore + RoleStore + PermissionStore
{
}
