//! Authorization error taxonomy.
//!
//! Expected denials are returned as [`crate::AccessDecision`] values; the
//! `PermissionDenied` / `ScopeAccessDenied` variants only surface when a caller
//! opts into strict evaluation or hits a guarded management operation.

use std::collections::BTreeSet;

use thiserror::Error;

use scopegate_core::{DomainError, OrgId, ScopeId};

use crate::store::StoreError;

pub type AuthzResult<T> = Result<T, AuthzError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("permission denied: missing [{}]", join_names(.missing))]
    PermissionDenied { missing: BTreeSet<String> },

    #[error("scope access denied: {scope_id}")]
    ScopeAccessDenied { scope_id: ScopeId },

    #[error("org isolation violation: tenant {caller_org} cannot reach org {requested_org}")]
    OrgIsolationViolation {
        caller_org: OrgId,
        requested_org: OrgId,
    },

    #[error("scope tree integrity violated at {scope_id}: {reason}")]
    CycleOrOrphanDetected { scope_id: ScopeId, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("edit conflict on {entity} {id}")]
    EditConflict { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Partial cascade or other state that needs manual reconciliation.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AuthzError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn missing(permission: impl Into<String>) -> Self {
        Self::PermissionDenied {
            missing: BTreeSet::from([permission.into()]),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Integrity failures are never retried; they need an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CycleOrOrphanDetected { .. } | Self::Fatal(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_))
    }
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl From<StoreError> for AuthzError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Duplicate { entity, key } => {
                Self::Validation(format!("{entity} already exists: {key}"))
            }
            StoreError::VersionConflict { entity, id, .. } => Self::EditConflict { entity, id },
            StoreError::Integrity { scope_id, reason } => {
                Self::CycleOrOrphanDetected { scope_id, reason }
            }
            StoreError::Backend(msg) => Self::PersistenceFailure(msg),
        }
    }
}

impl From<DomainError> for AuthzError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}
