//! `scopegate-auth`: the authorization core for multi-tenant RBAC/HRBAC.
//!
//! This crate is decoupled from HTTP and from any concrete storage; the
//! persistence boundary is the async trait set in [`store`].

pub mod authorize;
pub mod catalog;
pub mod claims;
pub mod config;
pub mod error;
pub mod guard;
pub mod hierarchy;
pub mod matrix;
pub mod org;
pub mod permissions;
pub mod principal;
pub mod registry;
pub mod roles;
pub mod scope;
pub mod service;
pub mod store;

pub use authorize::{AccessDecision, AccessRequest, Evaluator};
pub use catalog::{DeclaredPermission, MigrationReport, PermissionCatalog};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use config::AuthzConfig;
pub use error::{AuthzError, AuthzResult};
pub use guard::{TargetOrg, ensure_reachable, org_for_caller, scope_for_caller, tenant_for_caller};
pub use hierarchy::{ScopeTree, ScopeTreeNode, build_tree};
pub use matrix::{MatrixMode, MatrixSnapshot, RoleChange, RoleColumn, RolesMatrix, SaveReport};
pub use org::Org;
pub use permissions::{Permission, PermissionSource, builtin};
pub use principal::{Caller, User, resolve_active_user};
pub use roles::{Role, UserRole};
pub use scope::{Scope, UserScopeAssignment};
pub use service::{
    AuthzService, NewOrg, NewPermission, NewRole, NewScope, NewUser, RoleUpdate, ScopeDeletion,
    ScopeUpdate, TenantTree,
};
pub use store::{
    AssignmentStore, AuthzStore, OrgStore, PermissionStore, RoleStore, ScopeStore, StoreError,
    StoreResult, UserStore,
};
