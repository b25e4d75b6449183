//! Role/permission aggregation.
//!
//! Permissions are plain additive grants: a user's effective set is the union
//! over every role they hold inside their own tenant.

use std::collections::{BTreeSet, HashSet};

use scopegate_core::{RoleId, UserId};

use crate::error::{AuthzError, AuthzResult};
use crate::principal::User;
use crate::roles::Role;
use crate::store::{AssignmentStore, RoleStore, UserStore};

/// Roles `user` holds. Memberships pointing at another tenant's roles are ignored.
pub async fn roles_of<S>(store: &S, user: &User) -> AuthzResult<Vec<Role>>
where
    S: RoleStore + AssignmentStore + ?Sized,
{
    let held: HashSet<RoleId> = store.list_user_roles(user.id).await?.into_iter().collect();
    if held.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store
        .list_roles(user.root_org_id)
        .await?
        .into_iter()
        .filter(|role| held.contains(&role.id))
        .collect())
}

pub async fn permissions_of<S>(store: &S, user: &User) -> AuthzResult<BTreeSet<String>>
where
    S: RoleStore + AssignmentStore + ?Sized,
{
    Ok(roles_of(store, user)
        .await?
        .into_iter()
        .flat_map(|role| role.permissions)
        .collect())
}

/// Union of role permissions for `user_id`.
pub async fn effective_permissions<S>(store: &S, user_id: UserId) -> AuthzResult<BTreeSet<String>>
where
    S: UserStore + RoleStore + AssignmentStore + ?Sized,
{
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AuthzError::not_found("user", user_id))?;
    permissions_of(store, &user).await
}
