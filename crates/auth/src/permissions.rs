use serde::{Deserialize, Serialize};

use scopegate_core::PermissionId;

/// Permission names the management surface checks for.
pub mod builtin {
    pub const USER_MANAGEMENT: &str = "admin_user_management";
    pub const ROLE_MANAGEMENT: &str = "admin_role_management";
    pub const SCOPE_MANAGEMENT: &str = "admin_scope_management";

    /// Default name of the permission that bypasses org isolation and scope checks.
    pub const GLOBAL_ADMIN: &str = "global_admin";
}

/// Where a permission entry comes from.
///
/// Config-sourced permissions are declared by the host application and have
/// no id until they are migrated into the Database source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSource {
    Config,
    Database,
}

/// A permission catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Option<PermissionId>,
    pub name: String,
    pub description: String,
    pub source: PermissionSource,
}

impl Permission {
    /// A new persisted permission with a fresh id.
    pub fn persisted(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Some(PermissionId::new()),
            name: name.into(),
            description: description.into(),
            source: PermissionSource::Database,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.source == PermissionSource::Database
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}
