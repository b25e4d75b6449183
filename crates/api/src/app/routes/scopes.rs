use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};

use scopegate_auth::{NewScope, Scope, ScopeDeletion, ScopeTreeNode, ScopeUpdate, TenantTree};
use scopegate_core::ScopeId;

use crate::app::dto::OrgQuery;
use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

pub async fn tree(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<ScopeTreeNode>>, ApiError> {
    Ok(Json(service.list_tree(principal.caller(), q.org_id).await?))
}

pub async fn all_trees(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<TenantTree>>, ApiError> {
    Ok(Json(service.list_all_trees(principal.caller()).await?))
}

pub async fn create(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewScope>,
) -> Result<(StatusCode, Json<Scope>), ApiError> {
    let scope = service.create_scope(principal.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(scope)))
}

pub async fn update(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ScopeId>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<ScopeUpdate>,
) -> Result<Json<Scope>, ApiError> {
    let scope = service
        .update_scope(principal.caller(), q.org_id, id, body)
        .await?;
    Ok(Json(scope))
}

/// Deletes the scope with its whole subtree and the assignments on it.
pub async fn remove(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ScopeId>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<ScopeDeletion>, ApiError> {
    Ok(Json(
        service.delete_scope(principal.caller(), q.org_id, id).await?,
    ))
}
