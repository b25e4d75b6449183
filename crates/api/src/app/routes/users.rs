use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};

use scopegate_auth::{NewUser, Role, User, UserScopeAssignment};
use scopegate_core::{RoleId, ScopeId, UserId};

use crate::app::dto::{AssignRoleRequest, AssignScopeRequest, ReplaceRolesRequest, RevokedGrants};
use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

pub async fn create(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = service.create_user(principal.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn deactivate(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(service.deactivate_user(principal.caller(), id).await?))
}

/// Drop every scope assignment and role membership of the user.
pub async fn revoke_all(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Result<Json<RevokedGrants>, ApiError> {
    let revoked = service.revoke_all_grants(principal.caller(), id).await?;
    Ok(Json(RevokedGrants { revoked }))
}

// --- scope assignments ---

pub async fn scopes(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<UserScopeAssignment>>, ApiError> {
    Ok(Json(service.list_user_scopes(principal.caller(), id).await?))
}

pub async fn assign_scope(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Json(body): Json<AssignScopeRequest>,
) -> Result<Json<UserScopeAssignment>, ApiError> {
    let assignment = service
        .assign_scope(principal.caller(), id, body.scope_id)
        .await?;
    Ok(Json(assignment))
}

pub async fn revoke_scope(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, scope_id)): Path<(UserId, ScopeId)>,
) -> Result<StatusCode, ApiError> {
    service
        .revoke_scope(principal.caller(), id, scope_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- role memberships ---

pub async fn roles(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(service.list_user_roles(principal.caller(), id).await?))
}

pub async fn assign_role(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<StatusCode, ApiError> {
    service
        .assign_role(principal.caller(), id, body.role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn replace_roles(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Json(body): Json<ReplaceRolesRequest>,
) -> Result<Json<Vec<Role>>, ApiError> {
    let roles = service
        .replace_user_roles(principal.caller(), id, body.role_ids)
        .await?;
    Ok(Json(roles))
}

pub async fn revoke_role(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, role_id)): Path<(UserId, RoleId)>,
) -> Result<StatusCode, ApiError> {
    service
        .revoke_role(principal.caller(), id, role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
