//! Authorization evaluator.
//!
//! A request-scoped computation over freshly fetched snapshots: identity,
//! then role permissions, then (when a target scope is given) the user's
//! direct grants and the target's ancestor path. Nothing is cached here.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use scopegate_core::{ScopeId, UserId};

use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::principal::{User, resolve_active_user};
use crate::registry;
use crate::store::AuthzStore;

/// Input of [`Evaluator::evaluate_access`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub required_permissions: BTreeSet<String>,
    #[serde(default)]
    pub target_scope_id: Option<ScopeId>,
    #[serde(default)]
    pub strict: bool,
}

impl AccessRequest {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            required_permissions: BTreeSet::new(),
            target_scope_id: None,
            strict: false,
        }
    }

    pub fn require<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.required_permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn in_scope(mut self, scope_id: ScopeId) -> Self {
        self.target_scope_id = Some(scope_id);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Outcome of an access check. Denial is an ordinary value here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub authenticated: bool,
    pub permission_ok: bool,
    pub missing_permissions: BTreeSet<String>,
    /// `None` when no target scope was asked about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_ok: Option<bool>,
    /// The granted scope closest to the target that satisfied the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_access_via: Option<ScopeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub permissions: BTreeSet<String>,
}

impl AccessDecision {
    /// Nothing is granted to an unresolved identity, so every required
    /// permission is reported missing.
    fn unauthenticated(request: &AccessRequest) -> Self {
        Self {
            authenticated: false,
            permission_ok: false,
            missing_permissions: request.required_permissions.clone(),
            scope_ok: None,
            scope_access_via: None,
            user: None,
            permissions: BTreeSet::new(),
        }
    }

    /// True when every question asked was answered positively.
    pub fn granted(&self) -> bool {
        self.authenticated && self.permission_ok && self.scope_ok.unwrap_or(true)
    }
}

pub struct Evaluator<'a, S: ?Sized> {
    store: &'a S,
    config: &'a AuthzConfig,
}

impl<'a, S> Evaluator<'a, S>
where
    S: AuthzStore + ?Sized,
{
    pub fn new(store: &'a S, config: &'a AuthzConfig) -> Self {
        Self { store, config }
    }

    pub async fn evaluate_access(&self, request: &AccessRequest) -> AuthzResult<AccessDecision> {
        let Some(user) = resolve_active_user(self.store, request.user_id).await? else {
            debug!(user_id = %request.user_id, "access evaluated: identity not active");
            if request.strict {
                return Err(AuthzError::NotAuthenticated);
            }
            return Ok(AccessDecision::unauthenticated(request));
        };

        let effective = registry::permissions_of(self.store, &user).await?;
        let missing: BTreeSet<String> = request
            .required_permissions
            .difference(&effective)
            .cloned()
            .collect();
        let permission_ok = missing.is_empty();
        let global_admin = effective.contains(&self.config.global_admin_permission);

        let (scope_ok, scope_access_via) = match request.target_scope_id {
            None => (None, None),
            Some(target) => {
                let via = self.granting_scope(&user, target).await?;
                (Some(global_admin || via.is_some()), via)
            }
        };

        debug!(
            user_id = %user.id,
            permission_ok,
            scope_ok = ?scope_ok,
            via = ?scope_access_via,
            global_admin,
            "access evaluated"
        );

        if request.strict {
            if !permission_ok {
                return Err(AuthzError::PermissionDenied { missing });
            }
            if let (Some(false), Some(scope_id)) = (scope_ok, request.target_scope_id) {
                return Err(AuthzError::ScopeAccessDenied { scope_id });
            }
        }

        Ok(AccessDecision {
            authenticated: true,
            permission_ok,
            missing_permissions: missing,
            scope_ok,
            scope_access_via,
            user: Some(user),
            permissions: effective,
        })
    }

    /// Closest direct grant on the target's ancestor path inside the user's
    /// tenant. A target outside the tenant yields `None`.
    ///
    /// Walks up one `get_scope` per level, so the cost follows the target's
    /// depth rather than the size of the tenant's tree.
    async fn granting_scope(&self, user: &User, target: ScopeId) -> AuthzResult<Option<ScopeId>> {
        let granted: HashSet<ScopeId> = self
            .store
            .list_scope_assignments(user.id)
            .await?
            .into_iter()
            .map(|a| a.scope_id)
            .collect();
        if granted.is_empty() {
            return Ok(None);
        }

        let tenant = user.root_org_id;
        let mut seen = HashSet::new();
        let mut child: Option<ScopeId> = None;
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                return Err(AuthzError::CycleOrOrphanDetected {
                    scope_id: id,
                    reason: "cycle on the ancestor path".to_string(),
                });
            }
            let Some(scope) = self.store.get_scope(tenant, id).await? else {
                return match child {
                    None => Ok(None),
                    Some(child) => Err(AuthzError::CycleOrOrphanDetected {
                        scope_id: child,
                        reason: format!("parent {id} does not exist"),
                    }),
                };
            };
            if granted.contains(&id) {
                return Ok(Some(id));
            }
            child = Some(id);
            cursor = scope.parent_id;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_permissions() {
        let user = UserId::new();
        let scope = ScopeId::new();
        let req = AccessRequest::new(user)
            .require(["b", "a", "a"])
            .in_scope(scope)
            .strict();
        assert_eq!(req.required_permissions.len(), 2);
        assert_eq!(req.target_scope_id, Some(scope));
        assert!(req.strict);
    }

    #[test]
    fn request_defaults_when_deserialized() {
        let user = UserId::new();
        let req: AccessRequest =
            serde_json::from_value(serde_json::json!({ "user_id": user.to_string() })).unwrap();
        assert_eq!(req, AccessRequest::new(user));
    }

    #[test]
    fn unauthenticated_decision_reports_everything_missing() {
        let req = AccessRequest::new(UserId::new()).require(["x"]);
        let decision = AccessDecision::unauthenticated(&req);
        assert!(!decision.granted());
        assert_eq!(decision.missing_permissions, BTreeSet::from(["x".to_string()]));

        let json = serde_json::to_value(&decision).unwrap();
        assert!(json.get("scope_ok").is_none());
        assert_eq!(json["authenticated"], false);
    }
}
