use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};

use scopegate_auth::{MigrationReport, NewPermission, Permission};
use scopegate_core::PermissionId;

use crate::app::dto::{OrgQuery, UpdatePermissionRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

/// Declared and persisted permissions, merged.
pub async fn list(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<Permission>>, ApiError> {
    Ok(Json(
        service.list_permissions(principal.caller(), q.org_id).await?,
    ))
}

pub async fn create(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<NewPermission>,
) -> Result<(StatusCode, Json<Permission>), ApiError> {
    let permission = service
        .create_permission(principal.caller(), q.org_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

pub async fn migrate(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<MigrationReport>, ApiError> {
    Ok(Json(
        service
            .migrate_permissions(principal.caller(), q.org_id)
            .await?,
    ))
}

pub async fn update(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionId>,
    Query(q): Query<OrgQuery>,
    Json(body): Json<UpdatePermissionRequest>,
) -> Result<Json<Permission>, ApiError> {
    let permission = service
        .update_permission(principal.caller(), q.org_id, id, body.description)
        .await?;
    Ok(Json(permission))
}

pub async fn remove(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionId>,
    Query(q): Query<OrgQuery>,
) -> Result<StatusCode, ApiError> {
    service
        .delete_permission(principal.caller(), q.org_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
