//! Org isolation guard.
//!
//! Every management read and write resolves its tenant here first. A caller
//! without the global-admin permission is pinned to its own root org.

use tracing::warn;

use scopegate_core::OrgId;

use crate::error::{AuthzError, AuthzResult};
use crate::principal::Caller;
use crate::store::OrgStore;

/// Effective org for a caller's request.
///
/// Without the global-admin permission, a requested org other than the
/// caller's root org is an `OrgIsolationViolation`; no request means the
/// caller's own root org.
pub fn scope_for_caller(caller: &Caller, requested: Option<OrgId>) -> AuthzResult<OrgId> {
    match requested {
        None => Ok(caller.root_org_id),
        Some(org) if org == caller.root_org_id => Ok(org),
        Some(org) if caller.global_admin => Ok(org),
        Some(org) => Err(isolation_violation(caller, org)),
    }
}

fn isolation_violation(caller: &Caller, requested: OrgId) -> AuthzError {
    warn!(
        user_id = %caller.user_id,
        caller_org = %caller.root_org_id,
        requested_org = %requested,
        "org isolation violation"
    );
    AuthzError::OrgIsolationViolation {
        caller_org: caller.root_org_id,
        requested_org: requested,
    }
}

/// Fail unless an entity living in `tenant` is reachable by `caller`.
pub fn ensure_reachable(caller: &Caller, tenant: OrgId) -> AuthzResult<()> {
    scope_for_caller(caller, Some(tenant)).map(|_| ())
}

/// An org a request targets, with the tenant it belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetOrg {
    pub org_id: OrgId,
    pub tenant: OrgId,
}

/// Resolve a requested org (the caller's root org when absent) and check
/// its tenant is reachable.
///
/// Child orgs of the caller's own tenant are allowed. An unknown org is
/// `NotFound` for a global admin and an isolation violation for everyone
/// else.
pub async fn org_for_caller<S>(
    store: &S,
    caller: &Caller,
    requested: Option<OrgId>,
) -> AuthzResult<TargetOrg>
where
    S: OrgStore + ?Sized,
{
    let org_id = requested.unwrap_or(caller.root_org_id);
    if org_id == caller.root_org_id {
        return Ok(TargetOrg {
            org_id,
            tenant: caller.root_org_id,
        });
    }
    let Some(record) = store.get_org(org_id).await? else {
        return Err(if caller.global_admin {
            AuthzError::not_found("org", org_id)
        } else {
            isolation_violation(caller, org_id)
        });
    };
    ensure_reachable(caller, record.root_org_id)?;
    Ok(TargetOrg {
        org_id,
        tenant: record.root_org_id,
    })
}

/// Tenant (root org) a request targets; see [`org_for_caller`].
pub async fn tenant_for_caller<S>(
    store: &S,
    caller: &Caller,
    requested: Option<OrgId>,
) -> AuthzResult<OrgId>
where
    S: OrgStore + ?Sized,
{
    org_for_caller(store, caller, requested)
        .await
        .map(|target| target.tenant)
}
