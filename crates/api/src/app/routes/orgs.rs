use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};

use scopegate_auth::{NewOrg, Org};
use scopegate_core::OrgId;

use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

pub async fn create(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewOrg>,
) -> Result<(StatusCode, Json<Org>), ApiError> {
    let org = service.create_org(principal.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn deactivate(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<OrgId>,
) -> Result<Json<Org>, ApiError> {
    Ok(Json(service.deactivate_org(principal.caller(), id).await?))
}
