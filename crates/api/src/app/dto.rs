use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use scopegate_auth::{AccessRequest, Caller};
use scopegate_core::{OrgId, RoleId, ScopeId, UserId};

// -------------------------
// Request DTOs
// -------------------------

/// `?org_id=` selector; absent means the caller's own tenant.
#[derive(Debug, Default, Deserialize)]
pub struct OrgQuery {
    #[serde(default)]
    pub org_id: Option<OrgId>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub required_permissions: BTreeSet<String>,
    #[serde(default)]
    pub target_scope_id: Option<ScopeId>,
    #[serde(default)]
    pub strict: bool,
}

impl EvaluateRequest {
    pub fn into_access_request(self, caller: &Caller) -> AccessRequest {
        AccessRequest {
            user_id: self.user_id.unwrap_or(caller.user_id),
            required_permissions: self.required_permissions,
            target_scope_id: self.target_scope_id,
            strict: self.strict,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplacePermissionsRequest {
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignScopeRequest {
    pub scope_id: ScopeId,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRolesRequest {
    pub role_ids: Vec<RoleId>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct RevokedGrants {
    pub revoked: u64,
}
