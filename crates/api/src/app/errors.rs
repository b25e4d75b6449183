use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use scopegate_auth::AuthzError;

/// Handler error: an [`AuthzError`] rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError(pub AuthzError);

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        authz_error_to_response(self.0)
    }
}

pub fn authz_error_to_response(err: AuthzError) -> Response {
    let message = err.to_string();
    match err {
        AuthzError::NotAuthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "not_authenticated", message)
        }
        AuthzError::PermissionDenied { missing } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": "permission_denied",
                "message": message,
                "missing_permissions": missing,
            })),
        )
            .into_response(),
        AuthzError::ScopeAccessDenied { .. } => {
            json_error(StatusCode::FORBIDDEN, "scope_access_denied", message)
        }
        AuthzError::OrgIsolationViolation { .. } => {
            json_error(StatusCode::FORBIDDEN, "org_isolation_violation", message)
        }
        AuthzError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        AuthzError::EditConflict { .. } => json_error(StatusCode::CONFLICT, "edit_conflict", message),
        AuthzError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        AuthzError::CycleOrOrphanDetected { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "cycle_or_orphan_detected",
            message,
        ),
        AuthzError::PersistenceFailure(detail) => {
            error!(%detail, "persistence failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_failure",
                "storage is unavailable, retry later",
            )
        }
        AuthzError::Fatal(detail) => {
            error!(%detail, "fatal authorization error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
