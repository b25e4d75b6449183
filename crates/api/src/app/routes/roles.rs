use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};

use scopegate_auth::{NewRole, Role, RoleUpdate};
use scopegate_core::RoleId;

use crate::app::dto::{OrgQuery, ReplacePermissionsRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

pub async fn list(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(service.list_roles(principal.caller(), q.org_id).await?))
}

pub async fn create(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<NewRole>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let role = service
        .create_role(principal.caller(), q.org_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<RoleUpdate>,
) -> Result<Json<Role>, ApiError> {
    let role = service
        .update_role(principal.caller(), q.org_id, id, body)
        .await?;
    Ok(Json(role))
}

/// Replace the role's permission set. With `expected_version` the write is
/// rejected with 409 when someone else saved first.
pub async fn replace_permissions(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<ReplacePermissionsRequest>,
) -> Result<Json<Role>, ApiError> {
    let role = service
        .replace_role_permissions(
            principal.caller(),
            q.org_id,
            id,
            body.permissions,
            body.expected_version,
        )
        .await?;
    Ok(Json(role))
}

pub async fn remove(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
    Query(q): Query<OrgQuery>,
) -> Result<StatusCode, ApiError> {
    service.delete_role(principal.caller(), q.org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
