use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::error;

use crate::api::types::{ErrorBody, ErrorKind, PasswordResetRequest};
use crate::otp::{OtpService, ResetError};

/// Set a new password with the token returned by a `PasswordReset` verification.
#[utoipa::path(
    post,
    path = "/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Password too short or too long, or missing payload", body = ErrorBody),
        (status = 401, description = "Reset token unknown, used, or expired", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = String)
    ),
    tag = "otp"
)]
pub async fn reset_password(
    service: Extension<Arc<OtpService>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, ErrorKind::BadRequest, "Missing payload");
    };

    match service
        .reset_password(&request.email, &request.reset_token, &request.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err @ ResetError::WeakPassword { .. }) => {
            error_response(StatusCode::BAD_REQUEST, ErrorKind::WeakPassword, &err.to_string())
        }
        Err(ResetError::InvalidGrant) => error_response(
            StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidGrant,
            "Reset token is invalid or expired",
        ),
        Err(ResetError::Storage(err)) => {
            error!("Failed to reset password: {err:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Password reset failed".to_string(),
            )
                .into_response()
        }
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, message: &str) -> Response {
    (status, Json(ErrorBody::new(kind, message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{memory::MemoryChallengeStore, OtpPolicy, Purpose, VerifyOutcome};
    use anyhow::{anyhow, Result};

    const OWNER: &str = "owner@campus.edu";

    async fn issue_reset_token(
        store: &MemoryChallengeStore,
        service: &OtpService,
    ) -> Result<String> {
        service.request_challenge(OWNER, Purpose::PasswordReset).await?;
        let message = store.outbox().pop().ok_or_else(|| anyhow!("no email"))?;
        let payload: serde_json::Value = serde_json::from_str(&message.payload_json)?;
        let code = payload["code"].as_str().ok_or_else(|| anyhow!("no code"))?;
        match service.verify(OWNER, code).await? {
            VerifyOutcome::Success {
                reset_token: Some(token),
            } => Ok(token),
            other => Err(anyhow!("unexpected outcome {other:?}")),
        }
    }

    #[tokio::test]
    async fn reset_missing_payload() {
        let store = MemoryChallengeStore::new();
        let service = Arc::new(OtpService::new(Arc::new(store), OtpPolicy::new()));
        let response = reset_password(Extension(service), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_flow_statuses() -> Result<()> {
        let store = MemoryChallengeStore::new().with_account(OWNER);
        let service = Arc::new(OtpService::new(Arc::new(store.clone()), OtpPolicy::new()));
        let token = issue_reset_token(&store, &service).await?;

        let request = |password: &str| PasswordResetRequest {
            email: OWNER.to_string(),
            reset_token: token.clone(),
            new_password: password.to_string(),
        };

        let response = reset_password(Extension(service.clone()), Some(Json(request("short"))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = reset_password(
            Extension(service.clone()),
            Some(Json(request("a much better password"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.password_hash(OWNER).is_some());

        let response = reset_password(
            Extension(service),
            Some(Json(request("yet another password"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
