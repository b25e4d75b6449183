//! Scope records and direct scope grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scopegate_core::{Entity, OrgId, ScopeId, UserId};

/// A node in a tenant's organizational tree (division, department, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub name: String,
    /// Free-form level name, e.g. "division" or "team".
    pub level_label: String,
    pub parent_id: Option<ScopeId>,
    pub org_id: OrgId,
    pub root_org_id: OrgId,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl Scope {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Entity for Scope {
    type Id = ScopeId;

    fn id(&self) -> ScopeId {
        self.id
    }
}

/// A direct grant of one scope to one user.
///
/// Access to descendants is derived at evaluation time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScopeAssignment {
    pub user_id: UserId,
    pub scope_id: ScopeId,
    pub scope_level: String,
    pub granted_at: DateTime<Utc>,
}
