use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scopegate_core::{Entity, OrgId, UserId};

use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::org::Org;
use crate::store::{OrgStore, UserStore};

/// An identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub org_id: OrgId,
    pub root_org_id: OrgId,
    pub email: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        org: &Org,
        email: impl Into<String>,
        display_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UserId::new(),
            org_id: org.id,
            root_org_id: org.root_org_id,
            email: email.into().trim().to_lowercase(),
            display_name: display_name.into(),
            active: true,
            created_at: now,
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

/// Resolve `user_id` to an active identity.
///
/// Returns `None` when the user is unknown, deactivated, or belongs to an org
/// that is missing or soft-deleted.
pub async fn resolve_active_user<S>(store: &S, user_id: UserId) -> AuthzResult<Option<User>>
where
    S: UserStore + OrgStore + ?Sized,
{
    let Some(user) = store.get_user(user_id).await? else {
        return Ok(None);
    };
    if !user.active {
        return Ok(None);
    }
    match store.get_org(user.org_id).await? {
        Some(org) if org.active => Ok(Some(user)),
        _ => Ok(None),
    }
}

/// The authenticated caller of a management operation, with its effective
/// permissions already aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub root_org_id: OrgId,
    pub permissions: BTreeSet<String>,
    pub global_admin: bool,
}

impl Caller {
    pub fn new(user: &User, permissions: BTreeSet<String>, config: &AuthzConfig) -> Self {
        let global_admin = permissions.contains(&config.global_admin_permission);
        Self {
            user_id: user.id,
            org_id: user.org_id,
            root_org_id: user.root_org_id,
            permissions,
            global_admin,
        }
    }

    pub fn has(&self, permission: &str) -> bool {
        self.global_admin || self.permissions.contains(permission)
    }

    /// Fail with `PermissionDenied` unless the caller holds `permission`.
    pub fn require(&self, permission: &str) -> AuthzResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AuthzError::missing(permission))
        }
    }

    pub fn require_global_admin(&self, config: &AuthzConfig) -> AuthzResult<()> {
        if self.global_admin {
            Ok(())
        } else {
            Err(AuthzError::missing(config.global_admin_permission.clone()))
        }
    }
}
