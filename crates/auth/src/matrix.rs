//! Roles-matrix edit workflow.
//!
//! `Viewing` shows the committed snapshot. `begin_edit` copies it into a
//! working copy; edits only touch the working copy. `save` writes every
//! touched role (or the user's role list) as a full replacement and refreshes
//! the snapshot; `cancel` drops the working copy, including roles added during
//! the session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use scopegate_core::{OrgId, RoleId, UserId};

use crate::error::{AuthzError, AuthzResult};
use crate::roles::Role;
use crate::store::{AssignmentStore, RoleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixMode {
    /// Role x permission checkboxes.
    RolePermissions,
    /// Role selection flags for one user.
    UserRoles(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleColumn {
    pub role_id: RoleId,
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<String>,
    pub version: u64,
    /// Added in the current session and not saved yet.
    pub pending: bool,
}

impl From<Role> for RoleColumn {
    fn from(role: Role) -> Self {
        Self {
            role_id: role.id,
            name: role.name,
            description: role.description,
            permissions: role.permissions,
            version: role.version,
            pending: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixSnapshot {
    pub roles: BTreeMap<RoleId, RoleColumn>,
    pub selected: BTreeSet<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MatrixState {
    Viewing,
    Editing(MatrixSnapshot),
}

/// A role whose working copy differs from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub role_id: RoleId,
    pub created: bool,
    pub granted: BTreeSet<String>,
    pub revoked: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub created_roles: Vec<RoleId>,
    pub updated_roles: Vec<RoleId>,
    pub user_roles_replaced: bool,
}

#[derive(Debug, Clone)]
pub struct RolesMatrix {
    tenant: OrgId,
    mode: MatrixMode,
    /// Permission names offered as rows.
    rows: BTreeSet<String>,
    committed: Arc<MatrixSnapshot>,
    state: MatrixState,
}

impl RolesMatrix {
    pub fn new(
        tenant: OrgId,
        mode: MatrixMode,
        rows: BTreeSet<String>,
        roles: Vec<Role>,
        selected: BTreeSet<RoleId>,
    ) -> Self {
        let snapshot = MatrixSnapshot {
            roles: roles.into_iter().map(|r| (r.id, RoleColumn::from(r))).collect(),
            selected,
        };
        Self {
            tenant,
            mode,
            rows,
            committed: Arc::new(snapshot),
            state: MatrixState::Viewing,
        }
    }

    /// Load the committed state of `tenant` from the store.
    pub async fn load<S>(
        store: &S,
        tenant: OrgId,
        mode: MatrixMode,
        rows: BTreeSet<String>,
    ) -> AuthzResult<Self>
    where
        S: RoleStore + AssignmentStore + ?Sized,
    {
        let roles = store.list_roles(tenant).await?;
        let selected = match mode {
            MatrixMode::RolePermissions => BTreeSet::new(),
            MatrixMode::UserRoles(user) => {
                let known: BTreeSet<RoleId> = roles.iter().map(|r| r.id).collect();
                store
                    .list_user_roles(user)
                    .await?
                    .into_iter()
                    .filter(|id| known.contains(id))
                    .collect()
            }
        };
        Ok(Self::new(tenant, mode, rows, roles, selected))
    }

    pub fn tenant(&self) -> OrgId {
        self.tenant
    }

    pub fn mode(&self) -> MatrixMode {
        self.mode
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, MatrixState::Editing(_))
    }

    pub fn committed(&self) -> &MatrixSnapshot {
        &self.committed
    }

    /// What the user currently sees.
    pub fn view(&self) -> &MatrixSnapshot {
        match &self.state {
            MatrixState::Viewing => &self.committed,
            MatrixState::Editing(working) => working,
        }
    }

    pub fn begin_edit(&mut self) -> AuthzResult<()> {
        if self.is_editing() {
            return Err(AuthzError::validation("matrix is already being edited"));
        }
        self.state = MatrixState::Editing(MatrixSnapshot::clone(&self.committed));
        Ok(())
    }

    fn working(&mut self) -> AuthzResult<&mut MatrixSnapshot> {
        match &mut self.state {
            MatrixState::Editing(working) => Ok(working),
            MatrixState::Viewing => Err(AuthzError::validation("matrix is not being edited")),
        }
    }

    pub fn set_permission(&mut self, role: RoleId, permission: &str, granted: bool) -> AuthzResult<()> {
        if self.mode != MatrixMode::RolePermissions {
            return Err(AuthzError::validation("permissions are read-only in user-roles mode"));
        }
        if !self.rows.contains(permission) {
            return Err(AuthzError::validation(format!("unknown permission: {permission}")));
        }
        let column = self
            .working()?
            .roles
            .get_mut(&role)
            .ok_or_else(|| AuthzError::not_found("role", role))?;
        if granted {
            column.permissions.insert(permission.to_string());
        } else {
            column.permissions.remove(permission);
        }
        Ok(())
    }

    pub fn toggle_permission(&mut self, role: RoleId, permission: &str) -> AuthzResult<()> {
        let granted = self
            .view()
            .roles
            .get(&role)
            .is_some_and(|c| c.permissions.contains(permission));
        self.set_permission(role, permission, !granted)
    }

    pub fn set_role_selected(&mut self, role: RoleId, selected: bool) -> AuthzResult<()> {
        if !matches!(self.mode, MatrixMode::UserRoles(_)) {
            return Err(AuthzError::validation("role selection needs user-roles mode"));
        }
        let working = self.working()?;
        if !working.roles.contains_key(&role) {
            return Err(AuthzError::not_found("role", role));
        }
        if selected {
            working.selected.insert(role);
        } else {
            working.selected.remove(&role);
        }
        Ok(())
    }

    /// Add a role column that only exists in the working copy until saved.
    pub fn add_role(&mut self, name: &str, description: &str) -> AuthzResult<RoleId> {
        if self.mode != MatrixMode::RolePermissions {
            return Err(AuthzError::validation("roles can only be added in role-permissions mode"));
        }
        let name = scopegate_core::error::non_blank("role name", name)?;
        let working = self.working()?;
        if working.roles.values().any(|c| c.name == name) {
            return Err(AuthzError::validation(format!("role already exists: {name}")));
        }
        let role_id = RoleId::new();
        working.roles.insert(
            role_id,
            RoleColumn {
                role_id,
                name,
                description: description.to_string(),
                permissions: BTreeSet::new(),
                version: 0,
                pending: true,
            },
        );
        Ok(role_id)
    }

    /// Diff of the working copy against the snapshot; empty while viewing.
    pub fn changes(&self) -> Vec<RoleChange> {
        let MatrixState::Editing(working) = &self.state else {
            return Vec::new();
        };
        working
            .roles
            .values()
            .filter_map(|column| {
                let before = self
                    .committed
                    .roles
                    .get(&column.role_id)
                    .map(|c| &c.permissions);
                // A pending role already written by an earlier, partially failed save
                // is an ordinary update from now on.
                let created = before.is_none();
                let empty = BTreeSet::new();
                let before = before.unwrap_or(&empty);
                let granted: BTreeSet<String> =
                    column.permissions.difference(before).cloned().collect();
                let revoked: BTreeSet<String> =
                    before.difference(&column.permissions).cloned().collect();
                (created || !granted.is_empty() || !revoked.is_empty()).then(|| RoleChange {
                    role_id: column.role_id,
                    created,
                    granted,
                    revoked,
                })
            })
            .collect()
    }

    /// Whether saving would newly hand out `permission`: granted on a role
    /// column, or reached through a role newly selected for the user.
    pub fn grants_permission(&self, permission: &str) -> bool {
        let MatrixState::Editing(working) = &self.state else {
            return false;
        };
        match self.mode {
            MatrixMode::RolePermissions => self
                .changes()
                .iter()
                .any(|change| change.granted.contains(permission)),
            MatrixMode::UserRoles(_) => working
                .selected
                .difference(&self.committed.selected)
                .filter_map(|id| working.roles.get(id))
                .any(|column| column.permissions.contains(permission)),
        }
    }

    pub fn selection_changed(&self) -> bool {
        match &self.state {
            MatrixState::Editing(working) => working.selected != self.committed.selected,
            MatrixState::Viewing => false,
        }
    }

    /// Discard the working copy and return to the last snapshot.
    pub fn cancel(&mut self) {
        self.state = MatrixState::Viewing;
    }

    /// Commit the working copy.
    ///
    /// Existing roles are replaced with the snapshot's version as the
    /// expected version, so a role changed elsewhere since the snapshot fails
    /// with `EditConflict`. On error the matrix stays in editing mode and the
    /// snapshot reflects whatever was already written.
    pub async fn save<S>(&mut self, store: &S) -> AuthzResult<SaveReport>
    where
        S: RoleStore + AssignmentStore + ?Sized,
    {
        let MatrixState::Editing(working) = &self.state else {
            return Err(AuthzError::validation("matrix is not being edited"));
        };
        let working = working.clone();
        let mut committed = MatrixSnapshot::clone(&self.committed);
        let mut report = SaveReport::default();

        let result = self
            .write_changes(store, &working, &mut committed, &mut report)
            .await;

        // Keep whatever landed so a retry does not conflict with our own writes.
        self.committed = Arc::new(committed);
        result?;

        info!(
            tenant = %self.tenant,
            created = report.created_roles.len(),
            updated = report.updated_roles.len(),
            user_roles_replaced = report.user_roles_replaced,
            "roles matrix saved"
        );
        self.state = MatrixState::Viewing;
        Ok(report)
    }

    async fn write_changes<S>(
        &self,
        store: &S,
        working: &MatrixSnapshot,
        committed: &mut MatrixSnapshot,
        report: &mut SaveReport,
    ) -> AuthzResult<()>
    where
        S: RoleStore + AssignmentStore + ?Sized,
    {
        for change in self.changes() {
            let column = &working.roles[&change.role_id];
            let saved = if change.created {
                let now = Utc::now();
                let mut role = Role::new(
                    self.tenant,
                    column.name.clone(),
                    column.description.clone(),
                    column.permissions.clone(),
                    now,
                );
                role.id = column.role_id;
                let role = store.insert_role(role).await?;
                report.created_roles.push(role.id);
                role
            } else {
                let role = store
                    .replace_role_permissions(
                        self.tenant,
                        column.role_id,
                        column.permissions.clone(),
                        Some(committed.roles[&column.role_id].version),
                    )
                    .await?;
                report.updated_roles.push(role.id);
                role
            };
            committed.roles.insert(saved.id, RoleColumn::from(saved));
        }

        if let MatrixMode::UserRoles(user) = self.mode {
            if working.selected != committed.selected {
                let roles: Vec<RoleId> = working.selected.iter().copied().collect();
                store.replace_user_roles(user, &roles).await?;
                committed.selected = working.selected.clone();
                report.user_roles_replaced = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> BTreeSet<String> {
        ["reports_view", "reports_export"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn role(tenant: OrgId, name: &str, perms: &[&str]) -> Role {
        Role::new(
            tenant,
            name,
            "",
            perms.iter().map(|p| p.to_string()).collect(),
            Utc::now(),
        )
    }

    #[test]
    fn edits_require_editing_state() {
        let tenant = OrgId::new();
        let r = role(tenant, "viewer", &[]);
        let id = r.id;
        let mut m = RolesMatrix::new(tenant, MatrixMode::RolePermissions, rows(), vec![r], BTreeSet::new());
        assert!(m.set_permission(id, "reports_view", true).is_err());
        m.begin_edit().unwrap();
        assert!(m.begin_edit().is_err());
        m.set_permission(id, "reports_view", true).unwrap();
        assert!(m.view().roles[&id].permissions.contains("reports_view"));
        assert!(m.committed().roles[&id].permissions.is_empty());
    }

    #[test]
    fn unknown_permission_row_is_rejected() {
        let tenant = OrgId::new();
        let r = role(tenant, "viewer", &[]);
        let id = r.id;
        let mut m = RolesMatrix::new(tenant, MatrixMode::RolePermissions, rows(), vec![r], BTreeSet::new());
        m.begin_edit().unwrap();
        assert!(matches!(
            m.set_permission(id, "nope", true),
            Err(AuthzError::Validation(_))
        ));
    }

    #[test]
    fn changes_diff_against_snapshot() {
        let tenant = OrgId::new();
        let r = role(tenant, "viewer", &["reports_view"]);
        let id = r.id;
        let mut m = RolesMatrix::new(tenant, MatrixMode::RolePermissions, rows(), vec![r], BTreeSet::new());
        m.begin_edit().unwrap();
        m.toggle_permission(id, "reports_view").unwrap();
        m.toggle_permission(id, "reports_export").unwrap();

        let changes = m.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].granted, BTreeSet::from(["reports_export".to_string()]));
        assert_eq!(changes[0].revoked, BTreeSet::from(["reports_view".to_string()]));

        // Toggling back leaves nothing to save.
        m.toggle_permission(id, "reports_view").unwrap();
        m.toggle_permission(id, "reports_export").unwrap();
        assert!(m.changes().is_empty());
    }

    #[test]
    fn cancel_drops_roles_added_in_session() {
        let tenant = OrgId::new();
        let mut m = RolesMatrix::new(tenant, MatrixMode::RolePermissions, rows(), vec![], BTreeSet::new());
        m.begin_edit().unwrap();
        let added = m.add_role("auditor", "read only").unwrap();
        assert!(m.view().roles[&added].pending);
        assert!(m.add_role("auditor", "dup").is_err());

        m.cancel();
        assert!(!m.is_editing());
        assert!(m.view().roles.is_empty());
        assert!(m.changes().is_empty());
    }

    #[test]
    fn selection_only_in_user_roles_mode() {
        let tenant = OrgId::new();
        let r = role(tenant, "viewer", &[]);
        let id = r.id;
        let mut perms = RolesMatrix::new(tenant, MatrixMode::RolePermissions, rows(), vec![r.clone()], BTreeSet::new());
        perms.begin_edit().unwrap();
        assert!(perms.set_role_selected(id, true).is_err());

        let mut users = RolesMatrix::new(tenant, MatrixMode::UserRoles(UserId::new()), rows(), vec![r], BTreeSet::new());
        users.begin_edit().unwrap();
        assert!(users.set_permission(id, "reports_view", true).is_err());
        users.set_role_selected(id, true).unwrap();
        assert!(users.selection_changed());
        users.set_role_selected(id, false).unwrap();
        assert!(!users.selection_changed());
    }

    #[test]
    fn reports_newly_granted_permissions() {
        let tenant = OrgId::new();
        let holder = role(tenant, "holder", &["reports_export"]);
        let viewer = role(tenant, "viewer", &[]);
        let (holder_id, viewer_id) = (holder.id, viewer.id);

        let mut perms = RolesMatrix::new(
            tenant,
            MatrixMode::RolePermissions,
            rows(),
            vec![holder.clone(), viewer.clone()],
            BTreeSet::new(),
        );
        assert!(!perms.grants_permission("reports_export"));
        perms.begin_edit().unwrap();
        // Already held elsewhere is not a new grant.
        assert!(!perms.grants_permission("reports_export"));
        perms.set_permission(viewer_id, "reports_export", true).unwrap();
        assert!(perms.grants_permission("reports_export"));
        assert!(!perms.grants_permission("reports_view"));

        let mut users = RolesMatrix::new(
            tenant,
            MatrixMode::UserRoles(UserId::new()),
            rows(),
            vec![holder, viewer],
            BTreeSet::from([viewer_id]),
        );
        users.begin_edit().unwrap();
        assert!(!users.grants_permission("reports_export"));
        users.set_role_selected(holder_id, true).unwrap();
        assert!(users.grants_permission("reports_export"));
    }
}
