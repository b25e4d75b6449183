//! Org-lookup cache.
//!
//! Every request resolves the caller's org to check that it is active, so org
//! reads are hot and change rarely. [`CachedStore`] puts a bounded TTL cache
//! in front of `get_org` and forwards everything else untouched.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use scopegate_auth::{
    AssignmentStore, AuthzStore, Org, OrgStore, Permission, PermissionStore, Role, RoleStore,
    Scope, ScopeStore, StoreResult, User, UserScopeAssignment, UserStore,
};
use scopegate_core::{OrgId, PermissionId, RoleId, ScopeId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for OrgCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1024,
        }
    }
}

#[derive(Debug)]
struct Entry {
    org: Org,
    inserted_at: Instant,
}

/// TTL cache of org records with a max-entry bound.
///
/// When full, the oldest entry is evicted to make room.
#[derive(Debug)]
pub struct OrgCache {
    config: OrgCacheConfig,
    entries: Mutex<HashMap<OrgId, Entry>>,
}

impl OrgCache {
    pub fn new(config: OrgCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: OrgId) -> Option<Org> {
        self.get_at(id, Instant::now())
    }

    fn get_at(&self, id: OrgId, now: Instant) -> Option<Org> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&id) {
            Some(e) if now.duration_since(e.inserted_at) < self.config.ttl => Some(e.org.clone()),
            Some(_) => {
                entries.remove(&id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, org: Org) {
        self.put_at(org, Instant::now());
    }

    fn put_at(&self, org: Org, now: Instant) {
        if self.config.max_entries == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if !entries.contains_key(&org.id) && entries.len() >= self.config.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(org_id = %oldest, "org cache evicted oldest entry");
            }
        }
        entries.insert(
            org.id,
            Entry {
                org,
                inserted_at: now,
            },
        );
    }

    pub fn invalidate(&self, id: OrgId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store wrapper that serves `get_org` from an [`OrgCache`].
pub struct CachedStore<S: ?Sized> {
    inner: Arc<S>,
    orgs: OrgCache,
}

impl<S: ?Sized> CachedStore<S> {
    pub fn new(inner: Arc<S>, config: OrgCacheConfig) -> Self {
        Self {
            inner,
            orgs: OrgCache::new(config),
        }
    }

    pub fn org_cache(&self) -> &OrgCache {
        &self.orgs
    }
}

#[async_trait]
impl<S> OrgStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn get_org(&self, id: OrgId) -> StoreResult<Option<Org>> {
        if let Some(org) = self.orgs.get(id) {
            return Ok(Some(org));
        }
        let org = self.inner.get_org(id).await?;
        if let Some(org) = &org {
            self.orgs.put(org.clone());
        }
        Ok(org)
    }

    async fn insert_org(&self, org: Org) -> StoreResult<Org> {
        self.orgs.invalidate(org.id);
        self.inner.insert_org(org).await
    }

    async fn update_org(&self, org: Org) -> StoreResult<Org> {
        self.orgs.invalidate(org.id);
        let org = self.inner.update_org(org).await?;
        self.orgs.invalidate(org.id);
        Ok(org)
    }

    async fn list_child_orgs(&self, parent: OrgId) -> StoreResult<Vec<Org>> {
        self.inner.list_child_orgs(parent).await
    }

    async fn list_root_orgs(&self) -> StoreResult<Vec<Org>> {
        self.inner.list_root_orgs().await
    }
}

#[async_trait]
impl<S> UserStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        self.inner.insert_user(user).await
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        self.inner.update_user(user).await
    }

    async fn count_active_users(&self, org: OrgId) -> StoreResult<u64> {
        self.inner.count_active_users(org).await
    }
}

#[async_trait]
impl<S> ScopeStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn list_scopes(&self, tenant: OrgId) -> StoreResult<Vec<Scope>> {
        self.inner.list_scopes(tenant).await
    }

    async fn get_scope(&self, tenant: OrgId, id: ScopeId) -> StoreResult<Option<Scope>> {
        self.inner.get_scope(tenant, id).await
    }

    async fn insert_scope(&self, scope: Scope) -> StoreResult<Scope> {
        self.inner.insert_scope(scope).await
    }

    async fn update_scope(&self, scope: Scope) -> StoreResult<Scope> {
        self.inner.update_scope(scope).await
    }

    async fn delete_scopes_cascade(&self, tenant: OrgId, ids: &[ScopeId]) -> StoreResult<u64> {
        self.inner.delete_scopes_cascade(tenant, ids).await
    }
}

#[async_trait]
impl<S> AssignmentStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn list_scope_assignments(&self, user: UserId) -> StoreResult<Vec<UserScopeAssignment>> {
        self.inner.list_scope_assignments(user).await
    }

    async fn upsert_scope_assignment(
        &self,
        assignment: UserScopeAssignment,
    ) -> StoreResult<UserScopeAssignment> {
        self.inner.upsert_scope_assignment(assignment).await
    }

    async fn delete_scope_assignment(&self, user: UserId, scope: ScopeId) -> StoreResult<bool> {
        self.inner.delete_scope_assignment(user, scope).await
    }

    async fn list_user_roles(&self, user: UserId) -> StoreResult<Vec<RoleId>> {
        self.inner.list_user_roles(user).await
    }

    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        self.inner.add_user_role(user, role).await
    }

    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<bool> {
        self.inner.remove_user_role(user, role).await
    }

    async fn replace_user_roles(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        self.inner.replace_user_roles(user, roles).await
    }

    async fn revoke_all_for_user(&self, user: UserId) -> StoreResult<u64> {
        self.inner.revoke_all_for_user(user).await
    }
}

#[async_trait]
impl<S> RoleStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn list_roles(&self, tenant: OrgId) -> StoreResult<Vec<Role>> {
        self.inner.list_roles(tenant).await
    }

    async fn get_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<Option<Role>> {
        self.inner.get_role(tenant, id).await
    }

    async fn insert_role(&self, role: Role) -> StoreResult<Role> {
        self.inner.insert_role(role).await
    }

    async fn update_role(&self, role: Role) -> StoreResult<Role> {
        self.inner.update_role(role).await
    }

    async fn replace_role_permissions(
        &self,
        tenant: OrgId,
        id: RoleId,
        permissions: BTreeSet<String>,
        expected_version: Option<u64>,
    ) -> StoreResult<Role> {
        self.inner
            .replace_role_permissions(tenant, id, permissions, expected_version)
            .await
    }

    async fn delete_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<bool> {
        self.inner.delete_role(tenant, id).await
    }
}

#[async_trait]
impl<S> PermissionStore for CachedStore<S>
where
    S: AuthzStore + ?Sized,
{
    async fn list_permissions(&self, tenant: OrgId) -> StoreResult<Vec<Permission>> {
        self.inner.list_permissions(tenant).await
    }

    async fn insert_permission(
        &self,
        tenant: OrgId,
        permission: Permission,
    ) -> StoreResult<Permission> {
        self.inner.insert_permission(tenant, permission).await
    }

    async fn update_permission(
        &self,
        tenant: OrgId,
        permission: Permission,
    ) -> StoreResult<Permission> {
        self.inner.update_permission(tenant, permission).await
    }

    async fn delete_permission(&self, tenant: OrgId, id: PermissionId) -> StoreResult<bool> {
        self.inner.delete_permission(tenant, id).await
    }
}
