//! Management surface.
//!
//! Every operation resolves its tenant through the org isolation guard and
//! checks the matching built-in management permission before touching the
//! store. Reads need an authenticated caller inside the tenant only.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use scopegate_core::error::non_blank;
use scopegate_core::{OrgId, PermissionId, RoleId, ScopeId, UserId};

use crate::authorize::{AccessDecision, AccessRequest, Evaluator};
use crate::catalog::{MigrationReport, PermissionCatalog};
use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::guard::{TargetOrg, ensure_reachable, org_for_caller, tenant_for_caller};
use crate::hierarchy::{ScopeTreeNode, build_tree};
use crate::matrix::{MatrixMode, RolesMatrix, SaveReport};
use crate::org::Org;
use crate::permissions::{Permission, builtin};
use crate::principal::{Caller, User, resolve_active_user};
use crate::registry;
use crate::roles::Role;
use crate::scope::{Scope, UserScopeAssignment};
use crate::store::{AuthzStore, StoreError};

/// `None` when the field is absent, `Some(None)` when it is explicitly null.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrg {
    pub name: String,
    #[serde(default)]
    pub parent_org_id: Option<OrgId>,
    #[serde(default)]
    pub user_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    /// Defaults to the caller's own org.
    #[serde(default)]
    pub org_id: Option<OrgId>,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewScope {
    pub name: String,
    pub level_label: String,
    #[serde(default)]
    pub parent_id: Option<ScopeId>,
    #[serde(default)]
    pub org_id: Option<OrgId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub level_label: Option<String>,
    /// `Some(None)` detaches the scope into a root.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<ScopeId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeDeletion {
    pub removed: Vec<ScopeId>,
    pub revoked_assignments: u64,
}

/// One tenant's scope forest.
#[derive(Debug, Clone, Serialize)]
pub struct TenantTree {
    pub org: Org,
    pub scopes: Vec<ScopeTreeNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPermission {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub struct AuthzService<S: ?Sized = dyn AuthzStore> {
    store: Arc<S>,
    config: Arc<AuthzConfig>,
    catalog: PermissionCatalog,
}

impl<S: ?Sized> Clone for AuthzService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            catalog: self.catalog.clone(),
        }
    }
}

impl<S> AuthzService<S>
where
    S: AuthzStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: AuthzConfig) -> Self {
        let catalog = PermissionCatalog::new(config.declared_permissions.clone());
        Self {
            store,
            config: Arc::new(config),
            catalog,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    // --- evaluation ---

    pub async fn evaluate_access(&self, request: &AccessRequest) -> AuthzResult<AccessDecision> {
        Evaluator::new(&*self.store, &self.config)
            .evaluate_access(request)
            .await
    }

    /// Evaluate on behalf of `caller`. Asking about another user requires
    /// user management inside that user's tenant.
    pub async fn evaluate_for(
        &self,
        caller: &Caller,
        request: &AccessRequest,
    ) -> AuthzResult<AccessDecision> {
        if request.user_id != caller.user_id {
            caller.require(builtin::USER_MANAGEMENT)?;
            if let Some(subject) = self.store.get_user(request.user_id).await? {
                ensure_reachable(caller, subject.root_org_id)?;
            }
        }
        self.evaluate_access(request).await
    }

    /// Turn an authenticated user id into a management caller.
    pub async fn resolve_caller(&self, user_id: UserId) -> AuthzResult<Caller> {
        let user = resolve_active_user(&*self.store, user_id)
            .await?
            .ok_or(AuthzError::NotAuthenticated)?;
        let permissions = registry::permissions_of(&*self.store, &user).await?;
        Ok(Caller::new(&user, permissions, &self.config))
    }

    // --- orgs ---

    pub async fn create_org(&self, caller: &Caller, new: NewOrg) -> AuthzResult<Org> {
        let name = non_blank("org name", &new.name)?;
        let now = Utc::now();
        let org = match new.parent_org_id {
            None => {
                caller.require_global_admin(&self.config)?;
                Org::new_root(name, new.user_limit, now)
            }
            Some(parent_id) => {
                caller.require(builtin::USER_MANAGEMENT)?;
                let parent = self.org(parent_id).await?;
                ensure_reachable(caller, parent.root_org_id)?;
                if !parent.active {
                    return Err(AuthzError::validation("parent org is inactive"));
                }
                Org::new_child(&parent, name, new.user_limit, now)
            }
        };
        let org = self.store.insert_org(org).await?;
        info!(org_id = %org.id, root_org_id = %org.root_org_id, "org created");
        Ok(org)
    }

    /// Soft delete. Refused while the org still has active children.
    pub async fn deactivate_org(&self, caller: &Caller, org_id: OrgId) -> AuthzResult<Org> {
        let mut org = self.org(org_id).await?;
        ensure_reachable(caller, org.root_org_id)?;
        if org.is_root() {
            caller.require_global_admin(&self.config)?;
        } else {
            caller.require(builtin::USER_MANAGEMENT)?;
        }
        let children = self.store.list_child_orgs(org.id).await?;
        if children.iter().any(|c| c.active) {
            return Err(AuthzError::validation(format!(
                "org {org_id} still has active child orgs"
            )));
        }
        org.active = false;
        let org = self.store.update_org(org).await?;
        info!(org_id = %org.id, "org deactivated");
        Ok(org)
    }

    async fn org(&self, org_id: OrgId) -> AuthzResult<Org> {
        self.store
            .get_org(org_id)
            .await?
            .ok_or_else(|| AuthzError::not_found("org", org_id))
    }

    // --- users ---

    pub async fn create_user(&self, caller: &Caller, new: NewUser) -> AuthzResult<User> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let org = self.org(new.org_id.unwrap_or(caller.org_id)).await?;
        ensure_reachable(caller, org.root_org_id)?;
        if !org.active {
            return Err(AuthzError::validation("org is inactive"));
        }
        if let Some(limit) = org.user_limit {
            let active = self.store.count_active_users(org.id).await?;
            if active >= u64::from(limit) {
                return Err(AuthzError::validation(format!(
                    "org {} reached its user limit of {limit}",
                    org.id
                )));
            }
        }
        let email = non_blank("email", &new.email)?;
        let user = self
            .store
            .insert_user(User::new(&org, email, new.display_name, Utc::now()))
            .await?;
        info!(user_id = %user.id, org_id = %org.id, "user created");
        Ok(user)
    }

    /// Grants are left in place; see [`Self::revoke_all_grants`].
    pub async fn deactivate_user(&self, caller: &Caller, user_id: UserId) -> AuthzResult<User> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let mut user = self.user_in_reach(caller, user_id).await?;
        user.active = false;
        let user = self.store.update_user(user).await?;
        info!(user_id = %user.id, "user deactivated");
        Ok(user)
    }

    pub async fn revoke_all_grants(&self, caller: &Caller, user_id: UserId) -> AuthzResult<u64> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        let revoked = self.store.revoke_all_for_user(user.id).await?;
        info!(user_id = %user.id, revoked, "all grants revoked");
        Ok(revoked)
    }

    async fn user_in_reach(&self, caller: &Caller, user_id: UserId) -> AuthzResult<User> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AuthzError::not_found("user", user_id))?;
        ensure_reachable(caller, user.root_org_id)?;
        Ok(user)
    }

    // --- scopes ---

    pub async fn create_scope(&self, caller: &Caller, new: NewScope) -> AuthzResult<Scope> {
        caller.require(builtin::SCOPE_MANAGEMENT)?;
        let target = org_for_caller(&*self.store, caller, new.org_id).await?;
        let org = self.org(target.org_id).await?;
        let tenant = target.tenant;

        if let Some(parent_id) = new.parent_id {
            let parent = self
                .store
                .get_scope(tenant, parent_id)
                .await?
                .ok_or_else(|| AuthzError::not_found("scope", parent_id))?;
            if parent.org_id != org.id {
                return Err(AuthzError::OrgIsolationViolation {
                    caller_org: org.id,
                    requested_org: parent.org_id,
                });
            }
        }

        let now = Utc::now();
        let scope = Scope {
            id: ScopeId::new(),
            name: non_blank("scope name", &new.name)?,
            level_label: non_blank("level label", &new.level_label)?,
            parent_id: new.parent_id,
            org_id: org.id,
            root_org_id: tenant,
            created_at: now,
            changed_at: now,
        };
        let scope = self.store.insert_scope(scope).await?;
        info!(scope_id = %scope.id, parent_id = ?scope.parent_id, org_id = %org.id, "scope created");
        Ok(scope)
    }

    pub async fn update_scope(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        scope_id: ScopeId,
        update: ScopeUpdate,
    ) -> AuthzResult<Scope> {
        caller.require(builtin::SCOPE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let mut scope = self
            .store
            .get_scope(tenant, scope_id)
            .await?
            .ok_or_else(|| AuthzError::not_found("scope", scope_id))?;

        if let Some(name) = update.name {
            scope.name = non_blank("scope name", &name)?;
        }
        if let Some(level_label) = update.level_label {
            scope.level_label = non_blank("level label", &level_label)?;
        }
        if let Some(parent_id) = update.parent_id {
            if let Some(parent_id) = parent_id {
                self.check_reparent(tenant, &scope, parent_id).await?;
            }
            scope.parent_id = parent_id;
        }
        scope.changed_at = Utc::now();

        let scope = self.store.update_scope(scope).await?;
        info!(scope_id = %scope.id, parent_id = ?scope.parent_id, "scope updated");
        Ok(scope)
    }

    async fn check_reparent(&self, tenant: OrgId, scope: &Scope, parent_id: ScopeId) -> AuthzResult<()> {
        if parent_id == scope.id {
            return Err(AuthzError::CycleOrOrphanDetected {
                scope_id: scope.id,
                reason: "scope cannot be its own parent".to_string(),
            });
        }
        let tree = build_tree(self.store.list_scopes(tenant).await?)?;
        let parent = tree
            .get(parent_id)
            .ok_or_else(|| AuthzError::not_found("scope", parent_id))?;
        if tree.descendants_of(scope.id)?.contains(&parent_id) {
            return Err(AuthzError::CycleOrOrphanDetected {
                scope_id: scope.id,
                reason: format!("new parent {parent_id} is a descendant"),
            });
        }
        if parent.org_id != scope.org_id {
            return Err(AuthzError::OrgIsolationViolation {
                caller_org: scope.org_id,
                requested_org: parent.org_id,
            });
        }
        Ok(())
    }

    /// Remove the scope, its descendants and every assignment on them.
    pub async fn delete_scope(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        scope_id: ScopeId,
    ) -> AuthzResult<ScopeDeletion> {
        caller.require(builtin::SCOPE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let tree = build_tree(self.store.list_scopes(tenant).await?)?;
        if !tree.contains(scope_id) {
            return Err(AuthzError::not_found("scope", scope_id));
        }
        let mut removed = vec![scope_id];
        removed.extend(tree.descendants_of(scope_id)?);

        let revoked_assignments = match self.store.delete_scopes_cascade(tenant, &removed).await {
            Ok(n) => n,
            Err(StoreError::Backend(detail)) => {
                error!(%scope_id, %tenant, %detail, "cascading scope delete failed");
                return Err(AuthzError::Fatal(format!(
                    "cascading delete of scope {scope_id} failed: {detail}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            %scope_id,
            removed = removed.len(),
            revoked_assignments,
            "scope deleted"
        );
        Ok(ScopeDeletion {
            removed,
            revoked_assignments,
        })
    }

    /// The scope forest of the caller's tenant, or of one org inside it.
    pub async fn list_tree(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
    ) -> AuthzResult<Vec<ScopeTreeNode>> {
        let TargetOrg { org_id, tenant } = org_for_caller(&*self.store, caller, org).await?;
        let mut scopes = self.store.list_scopes(tenant).await?;
        if org_id != tenant {
            // Parents share their child's org, so this keeps whole subtrees.
            scopes.retain(|s| s.org_id == org_id);
        }
        Ok(build_tree(scopes)?.nested())
    }

    pub async fn list_all_trees(&self, caller: &Caller) -> AuthzResult<Vec<TenantTree>> {
        caller.require_global_admin(&self.config)?;
        let mut trees = Vec::new();
        for org in self.store.list_root_orgs().await? {
            let scopes = build_tree(self.store.list_scopes(org.id).await?)?.nested();
            trees.push(TenantTree { org, scopes });
        }
        Ok(trees)
    }

    // --- roles ---

    pub async fn list_roles(&self, caller: &Caller, org: Option<OrgId>) -> AuthzResult<Vec<Role>> {
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        Ok(self.store.list_roles(tenant).await?)
    }

    pub async fn create_role(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        new: NewRole,
    ) -> AuthzResult<Role> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let name = non_blank("role name", &new.name)?;
        self.check_known(tenant, &new.permissions).await?;
        self.check_grantable(caller, new.permissions.contains(self.global_admin()))?;
        let role = Role::new(tenant, name, new.description, new.permissions, Utc::now());
        let role = self.store.insert_role(role).await?;
        info!(role_id = %role.id, %tenant, "role created");
        Ok(role)
    }

    pub async fn update_role(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        role_id: RoleId,
        update: RoleUpdate,
    ) -> AuthzResult<Role> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let mut role = self.role(tenant, role_id).await?;
        if let Some(name) = update.name {
            role.name = non_blank("role name", &name)?;
        }
        if let Some(description) = update.description {
            role.description = description;
        }
        role.changed_at = Utc::now();
        Ok(self.store.update_role(role).await?)
    }

    /// Full replacement of a role's permission set.
    pub async fn replace_role_permissions(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        role_id: RoleId,
        permissions: BTreeSet<String>,
        expected_version: Option<u64>,
    ) -> AuthzResult<Role> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        self.check_known(tenant, &permissions).await?;
        self.check_grantable(caller, permissions.contains(self.global_admin()))?;
        let role = self
            .store
            .replace_role_permissions(tenant, role_id, permissions, expected_version)
            .await?;
        info!(
            role_id = %role.id,
            version = role.version,
            permissions = role.permissions.len(),
            "role permissions replaced"
        );
        Ok(role)
    }

    pub async fn delete_role(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        role_id: RoleId,
    ) -> AuthzResult<()> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        if !self.store.delete_role(tenant, role_id).await? {
            return Err(AuthzError::not_found("role", role_id));
        }
        info!(%role_id, %tenant, "role deleted");
        Ok(())
    }

    async fn role(&self, tenant: OrgId, role_id: RoleId) -> AuthzResult<Role> {
        self.store
            .get_role(tenant, role_id)
            .await?
            .ok_or_else(|| AuthzError::not_found("role", role_id))
    }

    fn global_admin(&self) -> &str {
        &self.config.global_admin_permission
    }

    /// Only a global admin hands out the global-admin permission, directly or
    /// through a role.
    fn check_grantable(&self, caller: &Caller, grants_global_admin: bool) -> AuthzResult<()> {
        if grants_global_admin && !caller.global_admin {
            warn!(
                user_id = %caller.user_id,
                tenant = %caller.root_org_id,
                "global-admin grant refused for tenant caller"
            );
            return caller.require_global_admin(&self.config);
        }
        Ok(())
    }

    async fn check_known(&self, tenant: OrgId, names: &BTreeSet<String>) -> AuthzResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let known = self.catalog.known_names(&*self.store, tenant).await?;
        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| !known.contains(*n))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(AuthzError::validation(format!(
                "unknown permissions: {}",
                unknown.join(", ")
            )))
        }
    }

    // --- roles matrix ---

    /// Load the matrix of the caller's tenant. User-roles mode needs the
    /// subject user to live in that tenant.
    pub async fn roles_matrix(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        mode: MatrixMode,
    ) -> AuthzResult<RolesMatrix> {
        self.require_matrix(caller, mode)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        if let MatrixMode::UserRoles(user_id) = mode {
            let user = self.user_in_reach(caller, user_id).await?;
            if user.root_org_id != tenant {
                return Err(AuthzError::OrgIsolationViolation {
                    caller_org: tenant,
                    requested_org: user.root_org_id,
                });
            }
        }
        let mut rows = self.catalog.known_names(&*self.store, tenant).await?;
        if !caller.global_admin {
            rows.remove(self.global_admin());
        }
        RolesMatrix::load(&*self.store, tenant, mode, rows).await
    }

    pub async fn save_matrix(
        &self,
        caller: &Caller,
        matrix: &mut RolesMatrix,
    ) -> AuthzResult<SaveReport> {
        self.require_matrix(caller, matrix.mode())?;
        ensure_reachable(caller, matrix.tenant())?;
        self.check_grantable(caller, matrix.grants_permission(self.global_admin()))?;
        matrix.save(&*self.store).await
    }

    fn require_matrix(&self, caller: &Caller, mode: MatrixMode) -> AuthzResult<()> {
        match mode {
            MatrixMode::RolePermissions => caller.require(builtin::ROLE_MANAGEMENT),
            MatrixMode::UserRoles(_) => caller.require(builtin::USER_MANAGEMENT),
        }
    }

    // --- permissions ---

    /// Merged catalog: Config and Database sources by name.
    pub async fn list_permissions(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
    ) -> AuthzResult<Vec<Permission>> {
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        self.catalog.list(&*self.store, tenant).await
    }

    pub async fn create_permission(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        new: NewPermission,
    ) -> AuthzResult<Permission> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let name = non_blank("permission name", &new.name)?;
        let permission = self
            .store
            .insert_permission(tenant, Permission::persisted(name, new.description))
            .await?;
        info!(permission = %permission, %tenant, "permission created");
        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        permission_id: PermissionId,
        description: String,
    ) -> AuthzResult<Permission> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let mut permission = self.permission(tenant, permission_id).await?;
        permission.description = description;
        Ok(self.store.update_permission(tenant, permission).await?)
    }

    /// Refused while a role of the tenant still grants the permission.
    pub async fn delete_permission(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
        permission_id: PermissionId,
    ) -> AuthzResult<()> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        let permission = self.permission(tenant, permission_id).await?;
        let holders: HashSet<String> = self
            .store
            .list_roles(tenant)
            .await?
            .into_iter()
            .filter(|r| r.permissions.contains(&permission.name))
            .map(|r| r.name)
            .collect();
        if !holders.is_empty() {
            return Err(AuthzError::validation(format!(
                "permission {} is still granted by {} role(s)",
                permission.name,
                holders.len()
            )));
        }
        self.store.delete_permission(tenant, permission_id).await?;
        info!(permission = %permission, %tenant, "permission deleted");
        Ok(())
    }

    async fn permission(&self, tenant: OrgId, id: PermissionId) -> AuthzResult<Permission> {
        self.store
            .list_permissions(tenant)
            .await?
            .into_iter()
            .find(|p| p.id == Some(id))
            .ok_or_else(|| AuthzError::not_found("permission", id))
    }

    pub async fn migrate_permissions(
        &self,
        caller: &Caller,
        org: Option<OrgId>,
    ) -> AuthzResult<MigrationReport> {
        caller.require(builtin::ROLE_MANAGEMENT)?;
        let tenant = tenant_for_caller(&*self.store, caller, org).await?;
        self.catalog
            .migrate_config_permissions(&*self.store, tenant)
            .await
    }

    // --- assignments ---

    pub async fn list_user_scopes(
        &self,
        caller: &Caller,
        user_id: UserId,
    ) -> AuthzResult<Vec<UserScopeAssignment>> {
        if user_id != caller.user_id {
            caller.require(builtin::USER_MANAGEMENT)?;
        }
        let user = self.user_in_reach(caller, user_id).await?;
        Ok(self.store.list_scope_assignments(user.id).await?)
    }

    /// Grant `scope_id` directly. Re-granting keeps the original record.
    pub async fn assign_scope(
        &self,
        caller: &Caller,
        user_id: UserId,
        scope_id: ScopeId,
    ) -> AuthzResult<UserScopeAssignment> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        let scope = self
            .store
            .get_scope(user.root_org_id, scope_id)
            .await?
            .ok_or_else(|| AuthzError::not_found("scope", scope_id))?;

        if let Some(existing) = self
            .store
            .list_scope_assignments(user.id)
            .await?
            .into_iter()
            .find(|a| a.scope_id == scope.id)
        {
            return Ok(existing);
        }
        let assignment = self
            .store
            .upsert_scope_assignment(UserScopeAssignment {
                user_id: user.id,
                scope_id: scope.id,
                scope_level: scope.level_label,
                granted_at: Utc::now(),
            })
            .await?;
        info!(user_id = %user.id, %scope_id, "scope assigned");
        Ok(assignment)
    }

    pub async fn revoke_scope(
        &self,
        caller: &Caller,
        user_id: UserId,
        scope_id: ScopeId,
    ) -> AuthzResult<()> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        if !self.store.delete_scope_assignment(user.id, scope_id).await? {
            return Err(AuthzError::not_found("scope assignment", scope_id));
        }
        info!(user_id = %user.id, %scope_id, "scope revoked");
        Ok(())
    }

    pub async fn list_user_roles(&self, caller: &Caller, user_id: UserId) -> AuthzResult<Vec<Role>> {
        if user_id != caller.user_id {
            caller.require(builtin::USER_MANAGEMENT)?;
        }
        let user = self.user_in_reach(caller, user_id).await?;
        registry::roles_of(&*self.store, &user).await
    }

    pub async fn assign_role(&self, caller: &Caller, user_id: UserId, role_id: RoleId) -> AuthzResult<()> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        let role = self.role(user.root_org_id, role_id).await?;
        self.check_grantable(caller, role.permissions.contains(self.global_admin()))?;
        self.store.add_user_role(user.id, role.id).await?;
        info!(user_id = %user.id, %role_id, "role assigned");
        Ok(())
    }

    pub async fn revoke_role(&self, caller: &Caller, user_id: UserId, role_id: RoleId) -> AuthzResult<()> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        if !self.store.remove_user_role(user.id, role_id).await? {
            return Err(AuthzError::not_found("role membership", role_id));
        }
        info!(user_id = %user.id, %role_id, "role revoked");
        Ok(())
    }

    /// Full replacement of the user's role memberships.
    pub async fn replace_user_roles(
        &self,
        caller: &Caller,
        user_id: UserId,
        role_ids: Vec<RoleId>,
    ) -> AuthzResult<Vec<Role>> {
        caller.require(builtin::USER_MANAGEMENT)?;
        let user = self.user_in_reach(caller, user_id).await?;
        let tenant_roles: HashMap<RoleId, Role> = self
            .store
            .list_roles(user.root_org_id)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let role_ids: Vec<RoleId> = role_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Some(foreign) = role_ids.iter().find(|id| !tenant_roles.contains_key(id)) {
            return Err(AuthzError::not_found("role", foreign));
        }
        let held: HashSet<RoleId> = self
            .store
            .list_user_roles(user.id)
            .await?
            .into_iter()
            .collect();
        let grants_global_admin = role_ids
            .iter()
            .filter(|id| !held.contains(id))
            .filter_map(|id| tenant_roles.get(id))
            .any(|role| role.permissions.contains(self.global_admin()));
        self.check_grantable(caller, grants_global_admin)?;
        self.store.replace_user_roles(user.id, &role_ids).await?;
        info!(user_id = %user.id, roles = role_ids.len(), "user roles replaced");
        registry::roles_of(&*self.store, &user).await
    }
}
