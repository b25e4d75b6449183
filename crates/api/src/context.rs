use scopegate_auth::Caller;
use scopegate_core::OrgId;

/// Tenant (root org) of the authenticated caller.
///
/// This is immutable and present on every authenticated route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: OrgId,
}

impl TenantContext {
    pub fn new(tenant_id: OrgId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> OrgId {
        self.tenant_id
    }
}

/// Authenticated caller with its effective permissions, resolved fresh for
/// the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    caller: Caller,
}

impl PrincipalContext {
    pub fn new(caller: Caller) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }
}
