use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scopegate_core::{Entity, OrgId};

/// An org in a tenant hierarchy. The root org (`root_org_id == id`) is the
/// isolation boundary for scopes, roles, permissions and assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
    pub parent_org_id: Option<OrgId>,
    pub root_org_id: OrgId,
    /// Maximum number of active users; `None` means unlimited.
    pub user_limit: Option<u32>,
    /// Soft-delete flag. Orgs are never hard-deleted while they have dependents.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Org {
    pub fn new_root(name: impl Into<String>, user_limit: Option<u32>, now: DateTime<Utc>) -> Self {
        let id = OrgId::new();
        Self {
            id,
            name: name.into(),
            parent_org_id: None,
            root_org_id: id,
            user_limit,
            active: true,
            created_at: now,
        }
    }

    pub fn new_child(
        parent: &Org,
        name: impl Into<String>,
        user_limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrgId::new(),
            name: name.into(),
            parent_org_id: Some(parent.id),
            root_org_id: parent.root_org_id,
            user_limit,
            active: true,
            created_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == self.root_org_id
    }
}

impl Entity for Org {
    type Id = OrgId;

    fn id(&self) -> OrgId {
        self.id
    }
}
