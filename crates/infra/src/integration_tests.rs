//! Store-backed tests for the full authorization pipeline.
//!
//! Service → guard → registry/hierarchy → in-memory store.
//!
//! Verifies:
//! - Evaluation scenarios (permissions, scope inheritance, strict mode)
//! - Tenant isolation, child-org reach and the global-admin bypass
//! - Global-admin grants reserved to global admins
//! - Cascading scope deletion
//! - Permission migration idempotence
//! - Roles-matrix save/cancel and stale-save detection

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Utc;

    use scopegate_auth::{
        AccessRequest, AuthzConfig, AuthzError, AuthzService, Caller, DeclaredPermission,
        MatrixMode, NewOrg, NewRole, NewScope, NewUser, Org, OrgStore, Role, RoleStore, Scope,
        RolesMatrix, ScopeUpdate, User, UserStore, AssignmentStore, builtin, registry,
    };
    use scopegate_core::{OrgId, ScopeId, UserId};

    use crate::store::InMemoryAuthzStore;

    type Service = AuthzService<InMemoryAuthzStore>;

    struct Fixture {
        svc: Service,
        store: Arc<InMemoryAuthzStore>,
        tenant: Org,
        admin: Caller,
    }

    fn config() -> AuthzConfig {
        AuthzConfig::default().with_declared([
            DeclaredPermission::new("reports_view", "View reports"),
            DeclaredPermission::new("reports_export", "Export reports"),
        ])
    }

    async fn tenant(store: &InMemoryAuthzStore, name: &str) -> Org {
        store
            .insert_org(Org::new_root(name, None, Utc::now()))
            .await
            .unwrap()
    }

    /// A user holding one role made of `perms`, written straight to the store.
    async fn user_with(store: &InMemoryAuthzStore, org: &Org, email: &str, perms: &[&str]) -> User {
        let user = store
            .insert_user(User::new(org, email, email, Utc::now()))
            .await
            .unwrap();
        if !perms.is_empty() {
            let role = store
                .insert_role(Role::new(
                    org.root_org_id,
                    format!("role-of-{email}"),
                    "",
                    perms.iter().map(|p| p.to_string()).collect(),
                    Utc::now(),
                ))
                .await
                .unwrap();
            store.add_user_role(user.id, role.id).await.unwrap();
        }
        user
    }

    async fn setup() -> Fixture {
        let store = Arc::new(InMemoryAuthzStore::new());
        let svc = AuthzService::new(store.clone(), config());
        let tenant = tenant(&store, "acme").await;
        let admin_user = user_with(
            &store,
            &tenant,
            "admin@acme.test",
            &[
                builtin::USER_MANAGEMENT,
                builtin::ROLE_MANAGEMENT,
                builtin::SCOPE_MANAGEMENT,
            ],
        )
        .await;
        let admin = svc.resolve_caller(admin_user.id).await.unwrap();
        Fixture {
            svc,
            store,
            tenant,
            admin,
        }
    }

    async fn scope(f: &Fixture, name: &str, parent: Option<&Scope>) -> Scope {
        f.svc
            .create_scope(
                &f.admin,
                NewScope {
                    name: name.to_string(),
                    level_label: "unit".to_string(),
                    parent_id: parent.map(|p| p.id),
                    org_id: None,
                },
            )
            .await
            .unwrap()
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_permissions_are_reported() {
        let f = setup().await;
        let user = user_with(&f.store, &f.tenant, "ops@acme.test", &[builtin::USER_MANAGEMENT]).await;

        let decision = f
            .svc
            .evaluate_access(
                &AccessRequest::new(user.id)
                    .require([builtin::USER_MANAGEMENT, builtin::ROLE_MANAGEMENT]),
            )
            .await
            .unwrap();

        assert!(decision.authenticated);
        assert!(!decision.permission_ok);
        assert_eq!(decision.missing_permissions, names(&[builtin::ROLE_MANAGEMENT]));
        assert_eq!(decision.scope_ok, None);
        assert_eq!(decision.user.as_ref().map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn grant_on_ancestor_covers_descendants() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let mid = scope(&f, "Sales", Some(&root)).await;
        let leaf = scope(&f, "Sales East", Some(&mid)).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;
        f.svc.assign_scope(&f.admin, user.id, mid.id).await.unwrap();

        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(leaf.id))
            .await
            .unwrap();
        assert_eq!(decision.scope_ok, Some(true));
        assert_eq!(decision.scope_access_via, Some(mid.id));

        // Self-grant counts.
        let on_mid = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(mid.id))
            .await
            .unwrap();
        assert_eq!(on_mid.scope_access_via, Some(mid.id));

        // Closest grant wins the audit tie-break.
        f.svc.assign_scope(&f.admin, user.id, root.id).await.unwrap();
        let both = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(leaf.id))
            .await
            .unwrap();
        assert_eq!(both.scope_access_via, Some(mid.id));
    }

    #[tokio::test]
    async fn sibling_scope_is_not_covered() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let left = scope(&f, "Sales", Some(&root)).await;
        let right = scope(&f, "Support", Some(&root)).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;
        f.svc.assign_scope(&f.admin, user.id, left.id).await.unwrap();

        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(right.id))
            .await
            .unwrap();
        assert_eq!(decision.scope_ok, Some(false));
        assert_eq!(decision.scope_access_via, None);
        assert!(!decision.granted());
    }

    #[tokio::test]
    async fn no_assignments_means_no_scope_access() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let user = user_with(&f.store, &f.tenant, "new@acme.test", &[]).await;
        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(root.id))
            .await
            .unwrap();
        assert_eq!(decision.scope_ok, Some(false));
    }

    #[tokio::test]
    async fn global_admin_crosses_tenants_and_tenant_admin_does_not() {
        let f = setup().await;
        let other = tenant(&f.store, "globex").await;
        let ops = user_with(&f.store, &other, "ops@globex.test", &[builtin::SCOPE_MANAGEMENT]).await;
        let ops = f.svc.resolve_caller(ops.id).await.unwrap();
        let foreign = f
            .svc
            .create_scope(
                &ops,
                NewScope {
                    name: "Globex HQ".to_string(),
                    level_label: "company".to_string(),
                    parent_id: None,
                    org_id: None,
                },
            )
            .await
            .unwrap();

        let root_user = user_with(&f.store, &f.tenant, "root@acme.test", &[builtin::GLOBAL_ADMIN]).await;
        let global = f.svc.resolve_caller(root_user.id).await.unwrap();
        assert!(global.global_admin);

        let trees = f.svc.list_tree(&global, Some(other.id)).await.unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].scope.id, foreign.id);

        let denied = f.svc.list_tree(&f.admin, Some(other.id)).await;
        assert_eq!(
            denied.unwrap_err(),
            AuthzError::OrgIsolationViolation {
                caller_org: f.tenant.id,
                requested_org: other.id,
            }
        );

        // Global admins pass the scope check everywhere they can reach.
        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(root_user.id).in_scope(foreign.id))
            .await
            .unwrap();
        assert_eq!(decision.scope_ok, Some(true));

        let all = f.svc.list_all_trees(&global).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(f.svc.list_all_trees(&f.admin).await.is_err());
    }

    #[tokio::test]
    async fn strict_mode_turns_denial_into_error() {
        let f = setup().await;
        let user = user_with(&f.store, &f.tenant, "ops@acme.test", &["reports_view"]).await;

        let err = f
            .svc
            .evaluate_access(
                &AccessRequest::new(user.id)
                    .require(["reports_view", "reports_export"])
                    .strict(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthzError::PermissionDenied {
                missing: names(&["reports_export"]),
            }
        );

        let root = scope(&f, "HQ", None).await;
        let err = f
            .svc
            .evaluate_access(
                &AccessRequest::new(user.id)
                    .require(["reports_view"])
                    .in_scope(root.id)
                    .strict(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, AuthzError::ScopeAccessDenied { scope_id: root.id });
    }

    #[tokio::test]
    async fn inactive_identity_is_unauthenticated() {
        let f = setup().await;
        let child = f
            .svc
            .create_org(
                &f.admin,
                NewOrg {
                    name: "acme-east".to_string(),
                    parent_org_id: Some(f.tenant.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();
        let user = user_with(&f.store, &child, "east@acme.test", &["reports_view"]).await;
        f.svc.deactivate_org(&f.admin, child.id).await.unwrap();

        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).require(["reports_view"]))
            .await
            .unwrap();
        assert!(!decision.authenticated);
        assert!(!decision.permission_ok);
        assert!(decision.user.is_none());

        let strict = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).strict())
            .await;
        assert_eq!(strict.unwrap_err(), AuthzError::NotAuthenticated);
        assert_eq!(
            f.svc.resolve_caller(user.id).await.unwrap_err(),
            AuthzError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn evaluation_is_deterministic() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let leaf = scope(&f, "Team", Some(&root)).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &["reports_view"]).await;
        f.svc.assign_scope(&f.admin, user.id, root.id).await.unwrap();

        let request = AccessRequest::new(user.id)
            .require(["reports_view", "reports_export"])
            .in_scope(leaf.id);
        let first = f.svc.evaluate_access(&request).await.unwrap();
        let second = f.svc.evaluate_access(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let f = setup().await;
        let first = f.svc.migrate_permissions(&f.admin, None).await.unwrap();
        assert_eq!(first.created.len(), 6);
        assert!(first.skipped.is_empty());
        let after_first = f.svc.list_permissions(&f.admin, None).await.unwrap();
        assert!(after_first.iter().all(|p| p.is_persisted()));

        let second = f.svc.migrate_permissions(&f.admin, None).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 6);
        assert_eq!(f.svc.list_permissions(&f.admin, None).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn deleting_a_scope_cascades() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let mid = scope(&f, "Sales", Some(&root)).await;
        let leaf = scope(&f, "Sales East", Some(&mid)).await;
        let other = scope(&f, "Support", Some(&root)).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;
        f.svc.assign_scope(&f.admin, user.id, leaf.id).await.unwrap();
        f.svc.assign_scope(&f.admin, user.id, mid.id).await.unwrap();
        f.svc.assign_scope(&f.admin, user.id, other.id).await.unwrap();

        let deletion = f.svc.delete_scope(&f.admin, None, mid.id).await.unwrap();
        assert_eq!(deletion.removed.len(), 2);
        assert_eq!(deletion.revoked_assignments, 2);

        let left: Vec<_> = f
            .store
            .list_scope_assignments(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.scope_id)
            .collect();
        assert_eq!(left, vec![other.id]);

        let tree = f.svc.list_tree(&f.admin, None).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].scope.id, other.id);

        assert!(matches!(
            f.svc.delete_scope(&f.admin, None, mid.id).await,
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reparenting_under_a_descendant_is_rejected() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let mid = scope(&f, "Sales", Some(&root)).await;
        let leaf = scope(&f, "Sales East", Some(&mid)).await;

        let err = f
            .svc
            .update_scope(
                &f.admin,
                None,
                root.id,
                ScopeUpdate {
                    parent_id: Some(Some(leaf.id)),
                    ..ScopeUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::CycleOrOrphanDetected { .. }));
        assert!(err.is_fatal());

        let detached = f
            .svc
            .update_scope(
                &f.admin,
                None,
                leaf.id,
                ScopeUpdate {
                    name: Some("East".to_string()),
                    parent_id: Some(None),
                    ..ScopeUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(detached.is_root());
        assert_eq!(detached.name, "East");
        assert_eq!(f.svc.list_tree(&f.admin, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn management_requires_the_matching_permission() {
        let f = setup().await;
        let viewer = user_with(&f.store, &f.tenant, "viewer@acme.test", &["reports_view"]).await;
        let viewer = f.svc.resolve_caller(viewer.id).await.unwrap();

        let err = f
            .svc
            .create_scope(
                &viewer,
                NewScope {
                    name: "HQ".to_string(),
                    level_label: "company".to_string(),
                    parent_id: None,
                    org_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, AuthzError::missing(builtin::SCOPE_MANAGEMENT));

        // Reads stay open inside the tenant.
        assert!(f.svc.list_roles(&viewer, None).await.is_ok());
        assert!(f.svc.migrate_permissions(&viewer, None).await.is_err());
    }

    #[tokio::test]
    async fn role_permissions_must_be_known() {
        let f = setup().await;
        let err = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "weird".to_string(),
                    description: String::new(),
                    permissions: names(&["reports_view", "launch_rockets"]),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation(ref m) if m.contains("launch_rockets")));

        let role = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "analyst".to_string(),
                    description: String::new(),
                    permissions: names(&["reports_view"]),
                },
            )
            .await
            .unwrap();
        let replaced = f
            .svc
            .replace_role_permissions(&f.admin, None, role.id, names(&["reports_export"]), None)
            .await
            .unwrap();
        assert_eq!(replaced.permissions, names(&["reports_export"]));
        assert_eq!(replaced.version, role.version + 1);
    }

    #[tokio::test]
    async fn matrix_save_replaces_touched_roles() {
        let f = setup().await;
        let role = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "analyst".to_string(),
                    description: String::new(),
                    permissions: names(&["reports_view"]),
                },
            )
            .await
            .unwrap();

        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::RolePermissions)
            .await
            .unwrap();
        matrix.begin_edit().unwrap();
        matrix.set_permission(role.id, "reports_export", true).unwrap();
        let added = matrix.add_role("auditor", "read only").unwrap();
        matrix.set_permission(added, "reports_view", true).unwrap();

        let report = f.svc.save_matrix(&f.admin, &mut matrix).await.unwrap();
        assert_eq!(report.updated_roles, vec![role.id]);
        assert_eq!(report.created_roles, vec![added]);
        assert!(!matrix.is_editing());

        let stored = f.store.get_role(f.tenant.id, role.id).await.unwrap().unwrap();
        assert_eq!(stored.permissions, names(&["reports_view", "reports_export"]));
        assert_eq!(matrix.committed().roles[&role.id].version, stored.version);
        let auditor = f.store.get_role(f.tenant.id, added).await.unwrap().unwrap();
        assert_eq!(auditor.permissions, names(&["reports_view"]));
    }

    #[tokio::test]
    async fn matrix_cancel_leaves_store_untouched() {
        let f = setup().await;
        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::RolePermissions)
            .await
            .unwrap();
        let before = f.store.list_roles(f.tenant.id).await.unwrap();

        matrix.begin_edit().unwrap();
        matrix.add_role("temp", "").unwrap();
        matrix.cancel();

        assert!(matrix.view().roles.values().all(|c| c.name != "temp"));
        assert!(f.svc.save_matrix(&f.admin, &mut matrix).await.is_err());
        assert_eq!(f.store.list_roles(f.tenant.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn stale_matrix_save_is_an_edit_conflict() {
        let f = setup().await;
        let role = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "analyst".to_string(),
                    description: String::new(),
                    permissions: BTreeSet::new(),
                },
            )
            .await
            .unwrap();
        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::RolePermissions)
            .await
            .unwrap();
        matrix.begin_edit().unwrap();
        matrix.set_permission(role.id, "reports_view", true).unwrap();

        // Another admin writes first.
        f.svc
            .replace_role_permissions(&f.admin, None, role.id, names(&["reports_export"]), None)
            .await
            .unwrap();

        let err = f.svc.save_matrix(&f.admin, &mut matrix).await.unwrap_err();
        assert!(matches!(err, AuthzError::EditConflict { .. }));
        assert!(matrix.is_editing());
        let stored = f.store.get_role(f.tenant.id, role.id).await.unwrap().unwrap();
        assert_eq!(stored.permissions, names(&["reports_export"]));
    }

    #[tokio::test]
    async fn user_roles_matrix_replaces_memberships() {
        let f = setup().await;
        let mk = |name: &str| NewRole {
            name: name.to_string(),
            description: String::new(),
            permissions: BTreeSet::new(),
        };
        let a = f.svc.create_role(&f.admin, None, mk("a")).await.unwrap();
        let b = f.svc.create_role(&f.admin, None, mk("b")).await.unwrap();
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;
        f.svc.assign_role(&f.admin, user.id, a.id).await.unwrap();

        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::UserRoles(user.id))
            .await
            .unwrap();
        assert!(matrix.view().selected.contains(&a.id));
        matrix.begin_edit().unwrap();
        matrix.set_role_selected(a.id, false).unwrap();
        matrix.set_role_selected(b.id, true).unwrap();
        let report = f.svc.save_matrix(&f.admin, &mut matrix).await.unwrap();
        assert!(report.user_roles_replaced);

        let held: Vec<_> = f
            .svc
            .list_user_roles(&f.admin, user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(held, vec![b.id]);
    }

    #[tokio::test]
    async fn user_limit_is_enforced() {
        let f = setup().await;
        let small = f
            .svc
            .create_org(
                &f.admin,
                NewOrg {
                    name: "branch".to_string(),
                    parent_org_id: Some(f.tenant.id),
                    user_limit: Some(1),
                },
            )
            .await
            .unwrap();
        let new_user = |email: &str| NewUser {
            org_id: Some(small.id),
            email: email.to_string(),
            display_name: String::new(),
        };

        let first = f.svc.create_user(&f.admin, new_user("a@acme.test")).await.unwrap();
        assert!(matches!(
            f.svc.create_user(&f.admin, new_user("b@acme.test")).await,
            Err(AuthzError::Validation(_))
        ));

        f.svc.deactivate_user(&f.admin, first.id).await.unwrap();
        assert!(f.svc.create_user(&f.admin, new_user("b@acme.test")).await.is_ok());
    }

    #[tokio::test]
    async fn org_with_active_children_cannot_be_deactivated() {
        let f = setup().await;
        let child = f
            .svc
            .create_org(
                &f.admin,
                NewOrg {
                    name: "branch".to_string(),
                    parent_org_id: Some(f.tenant.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();
        let grandchild = f
            .svc
            .create_org(
                &f.admin,
                NewOrg {
                    name: "desk".to_string(),
                    parent_org_id: Some(child.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(grandchild.root_org_id, f.tenant.id);

        assert!(matches!(
            f.svc.deactivate_org(&f.admin, child.id).await,
            Err(AuthzError::Validation(_))
        ));
        f.svc.deactivate_org(&f.admin, grandchild.id).await.unwrap();
        assert!(!f.svc.deactivate_org(&f.admin, child.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn revoke_all_grants_clears_scopes_and_roles() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &["reports_view"]).await;
        f.svc.assign_scope(&f.admin, user.id, root.id).await.unwrap();
        // Re-assigning is a no-op.
        f.svc.assign_scope(&f.admin, user.id, root.id).await.unwrap();

        let revoked = f.svc.revoke_all_grants(&f.admin, user.id).await.unwrap();
        assert_eq!(revoked, 2);
        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).require(["reports_view"]))
            .await
            .unwrap();
        assert!(!decision.permission_ok);
    }

    #[tokio::test]
    async fn scope_parent_must_share_the_org() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let root_user = user_with(&f.store, &f.tenant, "root@acme.test", &[builtin::GLOBAL_ADMIN]).await;
        let global = f.svc.resolve_caller(root_user.id).await.unwrap();
        let branch = f
            .svc
            .create_org(
                &global,
                NewOrg {
                    name: "branch".to_string(),
                    parent_org_id: Some(f.tenant.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();

        let err = f
            .svc
            .create_scope(
                &global,
                NewScope {
                    name: "Branch Office".to_string(),
                    level_label: "office".to_string(),
                    parent_id: Some(root.id),
                    org_id: Some(branch.id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::OrgIsolationViolation { .. }));
    }

    async fn global_admin(f: &Fixture) -> Caller {
        let root_user = user_with(&f.store, &f.tenant, "root@acme.test", &[builtin::GLOBAL_ADMIN]).await;
        f.svc.resolve_caller(root_user.id).await.unwrap()
    }

    fn denied_global_admin(err: AuthzError) -> bool {
        matches!(err, AuthzError::PermissionDenied { missing } if missing.contains(builtin::GLOBAL_ADMIN))
    }

    #[tokio::test]
    async fn tenant_admin_cannot_grant_global_admin_through_roles() {
        let f = setup().await;
        let global = global_admin(&f).await;

        let err = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "root".to_string(),
                    description: String::new(),
                    permissions: names(&[builtin::GLOBAL_ADMIN, "reports_view"]),
                },
            )
            .await
            .unwrap_err();
        assert!(denied_global_admin(err));

        let analyst = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "analyst".to_string(),
                    description: String::new(),
                    permissions: names(&["reports_view"]),
                },
            )
            .await
            .unwrap();
        let err = f
            .svc
            .replace_role_permissions(&f.admin, None, analyst.id, names(&[builtin::GLOBAL_ADMIN]), None)
            .await
            .unwrap_err();
        assert!(denied_global_admin(err));
        let stored = f.store.get_role(f.tenant.id, analyst.id).await.unwrap().unwrap();
        assert_eq!(stored.permissions, names(&["reports_view"]));

        // The admin's own caller stays a tenant caller.
        let again = f.svc.resolve_caller(f.admin.user_id).await.unwrap();
        assert!(!again.global_admin);

        // A global admin may still do it.
        f.svc
            .replace_role_permissions(&global, None, analyst.id, names(&[builtin::GLOBAL_ADMIN]), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn matrix_hides_and_refuses_the_global_admin_row() {
        let f = setup().await;
        let global = global_admin(&f).await;
        let role = f
            .svc
            .create_role(
                &f.admin,
                None,
                NewRole {
                    name: "analyst".to_string(),
                    description: String::new(),
                    permissions: BTreeSet::new(),
                },
            )
            .await
            .unwrap();

        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::RolePermissions)
            .await
            .unwrap();
        matrix.begin_edit().unwrap();
        assert!(matches!(
            matrix.set_permission(role.id, builtin::GLOBAL_ADMIN, true),
            Err(AuthzError::Validation(_))
        ));

        // A matrix built by hand with the row present is refused at save.
        let rows = names(&[builtin::GLOBAL_ADMIN, "reports_view"]);
        let roles = f.store.list_roles(f.tenant.id).await.unwrap();
        let mut forged =
            RolesMatrix::new(f.tenant.id, MatrixMode::RolePermissions, rows, roles, BTreeSet::new());
        forged.begin_edit().unwrap();
        forged.set_permission(role.id, builtin::GLOBAL_ADMIN, true).unwrap();
        let err = f.svc.save_matrix(&f.admin, &mut forged).await.unwrap_err();
        assert!(denied_global_admin(err));
        assert!(forged.is_editing());
        let stored = f.store.get_role(f.tenant.id, role.id).await.unwrap().unwrap();
        assert!(stored.permissions.is_empty());

        let mut full = f
            .svc
            .roles_matrix(&global, None, MatrixMode::RolePermissions)
            .await
            .unwrap();
        full.begin_edit().unwrap();
        full.set_permission(role.id, builtin::GLOBAL_ADMIN, true).unwrap();
        f.svc.save_matrix(&global, &mut full).await.unwrap();
    }

    #[tokio::test]
    async fn tenant_admin_cannot_hand_out_a_global_admin_role() {
        let f = setup().await;
        let global = global_admin(&f).await;
        let root_role = f
            .svc
            .create_role(
                &global,
                None,
                NewRole {
                    name: "root".to_string(),
                    description: String::new(),
                    permissions: names(&[builtin::GLOBAL_ADMIN]),
                },
            )
            .await
            .unwrap();
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;

        assert!(denied_global_admin(
            f.svc.assign_role(&f.admin, user.id, root_role.id).await.unwrap_err()
        ));
        assert!(denied_global_admin(
            f.svc
                .replace_user_roles(&f.admin, f.admin.user_id, vec![root_role.id])
                .await
                .unwrap_err()
        ));

        let mut matrix = f
            .svc
            .roles_matrix(&f.admin, None, MatrixMode::UserRoles(user.id))
            .await
            .unwrap();
        matrix.begin_edit().unwrap();
        matrix.set_role_selected(root_role.id, true).unwrap();
        assert!(denied_global_admin(
            f.svc.save_matrix(&f.admin, &mut matrix).await.unwrap_err()
        ));
        assert!(f.store.list_user_roles(user.id).await.unwrap().is_empty());

        f.svc.assign_role(&global, user.id, root_role.id).await.unwrap();
        // Keeping a role the user already holds is not a new grant.
        let kept = f
            .svc
            .replace_user_roles(&f.admin, user.id, vec![root_role.id])
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn child_orgs_of_the_own_tenant_are_reachable() {
        let f = setup().await;
        let emea = f
            .svc
            .create_org(
                &f.admin,
                NewOrg {
                    name: "emea".to_string(),
                    parent_org_id: Some(f.tenant.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();
        scope(&f, "HQ", None).await;

        let office = f
            .svc
            .create_scope(
                &f.admin,
                NewScope {
                    name: "EMEA Office".to_string(),
                    level_label: "office".to_string(),
                    parent_id: None,
                    org_id: Some(emea.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(office.org_id, emea.id);
        assert_eq!(office.root_org_id, f.tenant.id);

        let emea_tree = f.svc.list_tree(&f.admin, Some(emea.id)).await.unwrap();
        assert_eq!(emea_tree.len(), 1);
        assert_eq!(emea_tree[0].scope.id, office.id);
        assert_eq!(f.svc.list_tree(&f.admin, None).await.unwrap().len(), 2);

        // Another tenant's child org stays out of reach.
        let other = tenant(&f.store, "globex").await;
        let global = global_admin(&f).await;
        let apac = f
            .svc
            .create_org(
                &global,
                NewOrg {
                    name: "apac".to_string(),
                    parent_org_id: Some(other.id),
                    user_limit: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            f.svc.list_tree(&f.admin, Some(apac.id)).await,
            Err(AuthzError::OrgIsolationViolation { .. })
        ));

        // Unknown orgs: isolation for tenant callers, not-found for global admins.
        let unknown = OrgId::new();
        assert!(matches!(
            f.svc.list_tree(&f.admin, Some(unknown)).await,
            Err(AuthzError::OrgIsolationViolation { .. })
        ));
        assert!(matches!(
            f.svc.list_tree(&global, Some(unknown)).await,
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn effective_permissions_union_every_held_role() {
        let f = setup().await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &["reports_view"]).await;
        let export = f
            .store
            .insert_role(Role::new(
                f.tenant.id,
                "exporter",
                "",
                names(&["reports_export", "reports_view"]),
                Utc::now(),
            ))
            .await
            .unwrap();
        f.store.add_user_role(user.id, export.id).await.unwrap();

        // A membership pointing at a foreign role adds nothing.
        let other = tenant(&f.store, "globex").await;
        let foreign = f
            .store
            .insert_role(Role::new(
                other.id,
                "foreign",
                "",
                names(&[builtin::ROLE_MANAGEMENT]),
                Utc::now(),
            ))
            .await
            .unwrap();
        f.store.add_user_role(user.id, foreign.id).await.unwrap();

        let effective = registry::effective_permissions(&*f.store, user.id).await.unwrap();
        assert_eq!(effective, names(&["reports_export", "reports_view"]));

        let caller = f.svc.resolve_caller(user.id).await.unwrap();
        assert_eq!(caller.permissions, effective);

        assert!(matches!(
            registry::effective_permissions(&*f.store, UserId::new()).await,
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn scope_check_walks_only_the_ancestor_path() {
        let f = setup().await;
        let root = scope(&f, "HQ", None).await;
        let mut chain = vec![root.clone()];
        for depth in 1..40 {
            let next = scope(&f, &format!("level {depth}"), chain.last()).await;
            chain.push(next);
        }
        let side = scope(&f, "Side", Some(&root)).await;
        let user = user_with(&f.store, &f.tenant, "rep@acme.test", &[]).await;
        f.svc.assign_scope(&f.admin, user.id, chain[5].id).await.unwrap();

        let deepest = chain.last().unwrap().id;
        let decision = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(deepest))
            .await
            .unwrap();
        assert_eq!(decision.scope_access_via, Some(chain[5].id));

        let above = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(chain[4].id))
            .await
            .unwrap();
        assert_eq!(above.scope_ok, Some(false));
        let beside = f
            .svc
            .evaluate_access(&AccessRequest::new(user.id).in_scope(side.id))
            .await
            .unwrap();
        assert_eq!(beside.scope_ok, Some(false));

        // Unknown and foreign targets are simply not covered.
        let other = tenant(&f.store, "globex").await;
        let ops = user_with(&f.store, &other, "ops@globex.test", &[builtin::SCOPE_MANAGEMENT]).await;
        let ops = f.svc.resolve_caller(ops.id).await.unwrap();
        let foreign = f
            .svc
            .create_scope(
                &ops,
                NewScope {
                    name: "Globex HQ".to_string(),
                    level_label: "company".to_string(),
                    parent_id: None,
                    org_id: None,
                },
            )
            .await
            .unwrap();
        for target in [foreign.id, ScopeId::new()] {
            let decision = f
                .svc
                .evaluate_access(&AccessRequest::new(user.id).in_scope(target))
                .await
                .unwrap();
            assert_eq!(decision.scope_ok, Some(false));
            assert_eq!(decision.scope_access_via, None);
        }
    }
}
