//! Core-facing configuration.

use crate::catalog::DeclaredPermission;
use crate::permissions::builtin;

/// Settings the authorization core needs from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzConfig {
    /// Name of the permission that bypasses org isolation and scope checks.
    pub global_admin_permission: String,
    /// Permissions declared by the host application (the Config source).
    pub declared_permissions: Vec<DeclaredPermission>,
}

impl AuthzConfig {
    pub fn new(global_admin_permission: impl Into<String>) -> Self {
        let global_admin_permission = global_admin_permission.into();
        let declared_permissions = builtin_declarations(&global_admin_permission);
        Self {
            global_admin_permission,
            declared_permissions,
        }
    }

    /// Add host-declared permissions; names already declared are ignored.
    pub fn with_declared(mut self, declared: impl IntoIterator<Item = DeclaredPermission>) -> Self {
        for permission in declared {
            if !self
                .declared_permissions
                .iter()
                .any(|p| p.name == permission.name)
            {
                self.declared_permissions.push(permission);
            }
        }
        self
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self::new(builtin::GLOBAL_ADMIN)
    }
}

fn builtin_declarations(global_admin: &str) -> Vec<DeclaredPermission> {
    vec![
        DeclaredPermission::new(global_admin, "Access to every tenant and scope"),
        DeclaredPermission::new(builtin::USER_MANAGEMENT, "Manage users and their grants"),
        DeclaredPermission::new(builtin::ROLE_MANAGEMENT, "Manage roles and permissions"),
        DeclaredPermission::new(builtin::SCOPE_MANAGEMENT, "Manage the scope tree"),
    ]
}
