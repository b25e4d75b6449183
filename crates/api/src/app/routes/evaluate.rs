use axum::{Json, extract::Extension};

use scopegate_auth::AccessDecision;

use crate::app::dto::EvaluateRequest;
use crate::app::errors::ApiError;
use crate::app::services::AppService;
use crate::context::PrincipalContext;

/// Answer an access question. Denials come back as a 200 decision unless the
/// request asked for strict evaluation.
pub async fn evaluate(
    Extension(service): Extension<AppService>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<EvaluateRequest>,
) -> Result<Json<AccessDecision>, ApiError> {
    let caller = principal.caller();
    let request = body.into_access_request(caller);
    Ok(Json(service.evaluate_for(caller, &request).await?))
}
