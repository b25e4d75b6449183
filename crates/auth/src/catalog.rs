//! Permission catalog: Config-declared names merged with persisted ones.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use scopegate_core::OrgId;

use crate::error::AuthzResult;
use crate::permissions::{Permission, PermissionSource};
use crate::store::{PermissionStore, StoreError};

/// A permission declared by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPermission {
    pub name: String,
    pub description: String,
}

impl DeclaredPermission {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    fn as_permission(&self) -> Permission {
        Permission {
            id: None,
            name: self.name.clone(),
            description: self.description.clone(),
            source: PermissionSource::Config,
        }
    }
}

/// Outcome of promoting Config permissions into the Database source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    declared: Vec<DeclaredPermission>,
}

impl PermissionCatalog {
    pub fn new(declared: Vec<DeclaredPermission>) -> Self {
        let mut seen = BTreeSet::new();
        let declared = declared
            .into_iter()
            .filter(|p| seen.insert(p.name.clone()))
            .collect();
        Self { declared }
    }

    pub fn declared(&self) -> &[DeclaredPermission] {
        &self.declared
    }

    /// Merge by name for display; a persisted entry shadows a declared one.
    pub fn merge(&self, persisted: Vec<Permission>) -> Vec<Permission> {
        let mut by_name: BTreeMap<String, Permission> = self
            .declared
            .iter()
            .map(|d| (d.name.clone(), d.as_permission()))
            .collect();
        for permission in persisted {
            by_name.insert(permission.name.clone(), permission);
        }
        by_name.into_values().collect()
    }

    /// The merged catalog of a tenant.
    pub async fn list<S>(&self, store: &S, tenant: OrgId) -> AuthzResult<Vec<Permission>>
    where
        S: PermissionStore + ?Sized,
    {
        Ok(self.merge(store.list_permissions(tenant).await?))
    }

    /// Names a role may be granted inside `tenant`.
    pub async fn known_names<S>(&self, store: &S, tenant: OrgId) -> AuthzResult<BTreeSet<String>>
    where
        S: PermissionStore + ?Sized,
    {
        Ok(self
            .list(store, tenant)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Insert every declared name the tenant does not persist yet.
    ///
    /// Idempotent: names already present are reported as skipped, never
    /// duplicated, so a second run creates nothing.
    pub async fn migrate_config_permissions<S>(
        &self,
        store: &S,
        tenant: OrgId,
    ) -> AuthzResult<MigrationReport>
    where
        S: PermissionStore + ?Sized,
    {
        let existing: BTreeSet<String> = store
            .list_permissions(tenant)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        let mut report = MigrationReport::default();
        for declared in &self.declared {
            if existing.contains(&declared.name) {
                report.skipped.push(declared.name.clone());
                continue;
            }
            let permission = Permission::persisted(&declared.name, &declared.description);
            match store.insert_permission(tenant, permission).await {
                Ok(_) => report.created.push(declared.name.clone()),
                // Lost a race with a concurrent migration.
                Err(StoreError::Duplicate { .. }) => report.skipped.push(declared.name.clone()),
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            tenant = %tenant,
            created = report.created.len(),
            skipped = report.skipped.len(),
            "config permissions migrated"
        );
        Ok(report)
    }
}
