use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

pub mod evaluate;
pub mod orgs;
pub mod permissions;
pub mod roles;
pub mod scopes;
pub mod system;
pub mod users;

/// Build the protected route tree (everything except `/health`).
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/authz/evaluate", post(evaluate::evaluate))
        .nest("/orgs", orgs_router())
        .nest("/scopes", scopes_router())
        .nest("/roles", roles_router())
        .nest("/permissions", permissions_router())
        .nest("/users", users_router())
}

fn orgs_router() -> Router {
    Router::new()
        .route("/", post(orgs::create))
        .route("/:id/deactivate", post(orgs::deactivate))
}

fn scopes_router() -> Router {
    Router::new()
        .route("/", get(scopes::tree).post(scopes::create))
        .route("/all", get(scopes::all_trees))
        .route("/:id", patch(scopes::update).delete(scopes::remove))
}

fn roles_router() -> Router {
    Router::new()
        .route("/", get(roles::list).post(roles::create))
        .route("/:id", patch(roles::update).delete(roles::remove))
        .route("/:id/permissions", put(roles::replace_permissions))
}

fn permissions_router() -> Router {
    Router::new()
        .route("/", get(permissions::list).post(permissions::create))
        .route("/migrate", post(permissions::migrate))
        .route("/:id", patch(permissions::update).delete(permissions::remove))
}

fn users_router() -> Router {
    Router::new()
        .route("/", post(users::create))
        .route("/:id/deactivate", post(users::deactivate))
        .route("/:id/grants", delete(users::revoke_all))
        .route("/:id/scopes", get(users::scopes).post(users::assign_scope))
        .route("/:id/scopes/:scope_id", delete(users::revoke_scope))
        .route(
            "/:id/roles",
            get(users::roles)
                .post(users::assign_role)
                .put(users::replace_roles),
        )
        .route("/:id/roles/:role_id", delete(users::revoke_role))
}
