use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scopegate_core::{Entity, OrgId, RoleId, UserId};

/// A named bundle of permission grants inside one tenant.
///
/// Grants are additive only; there is no deny entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Tenant (root org) owning the role.
    pub root_org_id: OrgId,
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<String>,
    /// Bumped on every permission-set replacement.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        root_org_id: OrgId,
        name: impl Into<String>,
        description: impl Into<String>,
        permissions: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RoleId::new(),
            root_org_id,
            name: name.into(),
            description: description.into(),
            permissions,
            version: 1,
            created_at: now,
            changed_at: now,
        }
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}

/// Membership of a user in a role (many-to-many).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
}
