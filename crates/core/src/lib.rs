//! `scopegate-core`: identity and error primitives shared by every layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{OrgId, PermissionId, RoleId, ScopeId, UserId};
