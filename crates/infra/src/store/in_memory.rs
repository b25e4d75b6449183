use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use scopegate_auth::{
    AssignmentStore, Org, OrgStore, Permission, PermissionSource, PermissionStore, Role, RoleStore,
    Scope, ScopeStore, StoreError, StoreResult, User, UserScopeAssignment, UserStore,
};
use scopegate_core::{Entity, OrgId, PermissionId, RoleId, ScopeId, UserId};

#[derive(Debug, Default)]
struct Tables {
    orgs: HashMap<OrgId, Org>,
    users: HashMap<UserId, User>,
    scopes: HashMap<(OrgId, ScopeId), Scope>,
    scope_assignments: HashMap<(UserId, ScopeId), UserScopeAssignment>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    roles: HashMap<(OrgId, RoleId), Role>,
    permissions: HashMap<(OrgId, PermissionId), Permission>,
}

/// In-memory store for tests/dev.
///
/// All tables sit behind one lock, so every call (the scope cascade
/// included) is applied as a single unit.
#[derive(Debug, Default)]
pub struct InMemoryAuthzStore {
    inner: RwLock<Tables>,
}

impl InMemoryAuthzStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }
}

/// Walk up from `parent`; reaching `scope` means the move would close a cycle.
fn check_ancestry(t: &Tables, scope: &Scope, parent: ScopeId) -> StoreResult<()> {
    let tenant = scope.root_org_id;
    let mut cursor = Some(parent);
    let mut steps = 0usize;
    while let Some(id) = cursor {
        if id == scope.id {
            return Err(StoreError::Integrity {
                scope_id: scope.id,
                reason: format!("new parent {parent} is the scope itself or a descendant"),
            });
        }
        let node = t
            .scopes
            .get(&(tenant, id))
            .ok_or_else(|| StoreError::not_found("scope", id))?;
        steps += 1;
        if steps > t.scopes.len() {
            return Err(StoreError::Integrity {
                scope_id: id,
                reason: "existing cycle on the ancestor path".to_string(),
            });
        }
        cursor = node.parent_id;
    }
    Ok(())
}

#[async_trait]
impl OrgStore for InMemoryAuthzStore {
    async fn get_org(&self, id: OrgId) -> StoreResult<Option<Org>> {
        Ok(self.read()?.orgs.get(&id).cloned())
    }

    async fn insert_org(&self, org: Org) -> StoreResult<Org> {
        let mut t = self.write()?;
        if t.orgs.contains_key(&org.id) {
            return Err(StoreError::Duplicate {
                entity: "org",
                key: org.id.to_string(),
            });
        }
        t.orgs.insert(org.id(), org.clone());
        Ok(org)
    }

    async fn update_org(&self, org: Org) -> StoreResult<Org> {
        let mut t = self.write()?;
        let slot = t
            .orgs
            .get_mut(&org.id)
            .ok_or_else(|| StoreError::not_found("org", org.id))?;
        *slot = org.clone();
        Ok(org)
    }

    async fn list_child_orgs(&self, parent: OrgId) -> StoreResult<Vec<Org>> {
        let mut out: Vec<Org> = self
            .read()?
            .orgs
            .values()
            .filter(|o| o.parent_org_id == Some(parent))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn list_root_orgs(&self) -> StoreResult<Vec<Org>> {
        let mut out: Vec<Org> = self
            .read()?
            .orgs
            .values()
            .filter(|o| o.is_root())
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }
}

#[async_trait]
impl UserStore for InMemoryAuthzStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut t = self.write()?;
        let taken = t
            .users
            .values()
            .any(|u| u.root_org_id == user.root_org_id && u.email == user.email);
        if taken || t.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.email.clone(),
            });
        }
        t.users.insert(user.id(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let mut t = self.write()?;
        let slot = t
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::not_found("user", user.id))?;
        *slot = user.clone();
        Ok(user)
    }

    async fn count_active_users(&self, org: OrgId) -> StoreResult<u64> {
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| u.org_id == org && u.active)
            .count() as u64)
    }
}

#[async_trait]
impl ScopeStore for InMemoryAuthzStore {
    async fn list_scopes(&self, tenant: OrgId) -> StoreResult<Vec<Scope>> {
        let mut out: Vec<Scope> = self
            .read()?
            .scopes
            .iter()
            .filter_map(|((t, _), s)| (*t == tenant).then(|| s.clone()))
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn get_scope(&self, tenant: OrgId, id: ScopeId) -> StoreResult<Option<Scope>> {
        Ok(self.read()?.scopes.get(&(tenant, id)).cloned())
    }

    async fn insert_scope(&self, scope: Scope) -> StoreResult<Scope> {
        let mut t = self.write()?;
        let key = (scope.root_org_id, scope.id());
        if t.scopes.contains_key(&key) {
            return Err(StoreError::Duplicate {
                entity: "scope",
                key: scope.id.to_string(),
            });
        }
        if let Some(parent) = scope.parent_id {
            if !t.scopes.contains_key(&(scope.root_org_id, parent)) {
                return Err(StoreError::not_found("scope", parent));
            }
        }
        t.scopes.insert(key, scope.clone());
        Ok(scope)
    }

    async fn update_scope(&self, scope: Scope) -> StoreResult<Scope> {
        let mut t = self.write()?;
        if !t.scopes.contains_key(&(scope.root_org_id, scope.id)) {
            return Err(StoreError::not_found("scope", scope.id));
        }
        if let Some(parent) = scope.parent_id {
            check_ancestry(&t, &scope, parent)?;
        }
        t.scopes.insert((scope.root_org_id, scope.id()), scope.clone());
        Ok(scope)
    }

    async fn delete_scopes_cascade(&self, tenant: OrgId, ids: &[ScopeId]) -> StoreResult<u64> {
        let mut doomed: HashSet<ScopeId> = ids.iter().copied().collect();
        let mut t = self.write()?;
        // Children written after the caller computed `ids` go too.
        loop {
            let more: Vec<ScopeId> = t
                .scopes
                .iter()
                .filter(|((owner, id), s)| {
                    *owner == tenant
                        && !doomed.contains(id)
                        && s.parent_id.is_some_and(|p| doomed.contains(&p))
                })
                .map(|((_, id), _)| *id)
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }
        t.scopes
            .retain(|(owner, id), _| !(*owner == tenant && doomed.contains(id)));
        let before = t.scope_assignments.len();
        t.scope_assignments
            .retain(|(_, scope_id), _| !doomed.contains(scope_id));
        Ok((before - t.scope_assignments.len()) as u64)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAuthzStore {
    async fn list_scope_assignments(&self, user: UserId) -> StoreResult<Vec<UserScopeAssignment>> {
        let mut out: Vec<UserScopeAssignment> = self
            .read()?
            .scope_assignments
            .iter()
            .filter_map(|((u, _), a)| (*u == user).then(|| a.clone()))
            .collect();
        out.sort_by(|a, b| (a.granted_at, a.scope_id).cmp(&(b.granted_at, b.scope_id)));
        Ok(out)
    }

    async fn upsert_scope_assignment(
        &self,
        assignment: UserScopeAssignment,
    ) -> StoreResult<UserScopeAssignment> {
        self.write()?
            .scope_assignments
            .insert((assignment.user_id, assignment.scope_id), assignment.clone());
        Ok(assignment)
    }

    async fn delete_scope_assignment(&self, user: UserId, scope: ScopeId) -> StoreResult<bool> {
        Ok(self
            .write()?
            .scope_assignments
            .remove(&(user, scope))
            .is_some())
    }

    async fn list_user_roles(&self, user: UserId) -> StoreResult<Vec<RoleId>> {
        Ok(self
            .read()?
            .user_roles
            .iter()
            .filter_map(|(u, r)| (*u == user).then_some(*r))
            .collect())
    }

    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        self.write()?.user_roles.insert((user, role));
        Ok(())
    }

    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<bool> {
        Ok(self.write()?.user_roles.remove(&(user, role)))
    }

    async fn replace_user_roles(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        let mut t = self.write()?;
        t.user_roles.retain(|(u, _)| *u != user);
        t.user_roles.extend(roles.iter().map(|r| (user, *r)));
        Ok(())
    }

    async fn revoke_all_for_user(&self, user: UserId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.scope_assignments.len() + t.user_roles.len();
        t.scope_assignments.retain(|(u, _), _| *u != user);
        t.user_roles.retain(|(u, _)| *u != user);
        Ok((before - t.scope_assignments.len() - t.user_roles.len()) as u64)
    }
}

#[async_trait]
impl RoleStore for InMemoryAuthzStore {
    async fn list_roles(&self, tenant: OrgId) -> StoreResult<Vec<Role>> {
        let mut out: Vec<Role> = self
            .read()?
            .roles
            .iter()
            .filter_map(|((t, _), r)| (*t == tenant).then(|| r.clone()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(&(tenant, id)).cloned())
    }

    async fn insert_role(&self, role: Role) -> StoreResult<Role> {
        let mut t = self.write()?;
        let taken = t
            .roles
            .values()
            .any(|r| r.root_org_id == role.root_org_id && (r.name == role.name || r.id == role.id));
        if taken {
            return Err(StoreError::Duplicate {
                entity: "role",
                key: role.name.clone(),
            });
        }
        t.roles.insert((role.root_org_id, role.id()), role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: Role) -> StoreResult<Role> {
        let mut t = self.write()?;
        let clash = t
            .roles
            .values()
            .any(|r| r.root_org_id == role.root_org_id && r.id != role.id && r.name == role.name);
        if clash {
            return Err(StoreError::Duplicate {
                entity: "role",
                key: role.name.clone(),
            });
        }
        let slot = t
            .roles
            .get_mut(&(role.root_org_id, role.id))
            .ok_or_else(|| StoreError::not_found("role", role.id))?;
        slot.name = role.name;
        slot.description = role.description;
        slot.changed_at = role.changed_at;
        Ok(slot.clone())
    }

    async fn replace_role_permissions(
        &self,
        tenant: OrgId,
        id: RoleId,
        permissions: BTreeSet<String>,
        expected_version: Option<u64>,
    ) -> StoreResult<Role> {
        let mut t = self.write()?;
        let role = t
            .roles
            .get_mut(&(tenant, id))
            .ok_or_else(|| StoreError::not_found("role", id))?;
        if let Some(expected) = expected_version {
            if expected != role.version {
                return Err(StoreError::VersionConflict {
                    entity: "role",
                    id: id.to_string(),
                    expected,
                    found: role.version,
                });
            }
        }
        role.permissions = permissions;
        role.version += 1;
        role.changed_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role(&self, tenant: OrgId, id: RoleId) -> StoreResult<bool> {
        let mut t = self.write()?;
        if t.roles.remove(&(tenant, id)).is_none() {
            return Ok(false);
        }
        t.user_roles.retain(|(_, r)| *r != id);
        Ok(true)
    }
}

#[async_trait]
impl PermissionStore for InMemoryAuthzStore {
    async fn list_permissions(&self, tenant: OrgId) -> StoreResult<Vec<Permission>> {
        let mut out: Vec<Permission> = self
            .read()?
            .permissions
            .iter()
            .filter_map(|((t, _), p)| (*t == tenant).then(|| p.clone()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn insert_permission(
        &self,
        tenant: OrgId,
        mut permission: Permission,
    ) -> StoreResult<Permission> {
        let mut t = self.write()?;
        let taken = t
            .permissions
            .iter()
            .any(|((owner, _), p)| *owner == tenant && p.name == permission.name);
        if taken {
            return Err(StoreError::Duplicate {
                entity: "permission",
                key: permission.name.clone(),
            });
        }
        let id = *permission.id.get_or_insert_with(PermissionId::new);
        permission.source = PermissionSource::Database;
        t.permissions.insert((tenant, id), permission.clone());
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
        let mut t = self.write()?;
        let slot = t
            .permissions
            .get_mut(&(tenant, id))
            .ok_or_else(|| StoreError::not_found("permission", id))?;
        slot.description = permission.description;
        Ok(slot.clone())
    }

    async fn delete_permission(&self, tenant: OrgId, id: PermissionId) -> StoreResult<bool> {
        Ok(self.write()?.permissions.remove(&(tenant, id)).is_some())
    }
}
