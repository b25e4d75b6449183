use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> impl IntoResponse {
    let caller = principal.caller();
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id(),
        "user_id": caller.user_id,
        "org_id": caller.org_id,
        "permissions": caller.permissions,
        "global_admin": caller.global_admin,
    }))
}
