//! Code issuance and verification endpoints.

use axum::{
    extract::Extension,
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::error;

use crate::api::types::{
    ErrorBody, ErrorKind, OtpRequest, OtpRequestAccepted, VerifyRequest, VerifyResponse,
    VerifyResult,
};
use crate::otp::{OtpError, OtpService};

/// Issue a one-time code for a claimed item or an account.
#[utoipa::path(
    post,
    path = "/otp/request",
    request_body = OtpRequest,
    responses(
        (status = 202, description = "Code issued and queued for email delivery", body = OtpRequestAccepted),
        (status = 400, description = "Missing or empty payload", body = ErrorBody),
        (status = 404, description = "Unknown item or account", body = ErrorBody),
        (status = 409, description = "Item is not awaiting return", body = ErrorBody),
        (status = 429, description = "Too many code requests", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = String)
    ),
    tag = "otp"
)]
pub async fn request_challenge(
    service: Extension<Arc<OtpService>>,
    payload: Option<Json<OtpRequest>>,
) -> impl IntoResponse {
    let request: OtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return bad_request("Missing payload"),
    };

    if request.subject_id.trim().is_empty() {
        return bad_request("Missing subjectId");
    }

    match service
        .request_challenge(&request.subject_id, request.purpose)
        .await
    {
        Ok(issued) => (
            StatusCode::ACCEPTED,
            Json(OtpRequestAccepted {
                expires_in_seconds: issued.expires_in_seconds,
            }),
        )
            .into_response(),
        Err(OtpError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new(ErrorKind::NotFound, "No matching item or account")),
        )
            .into_response(),
        Err(OtpError::NotEligible) => (
            StatusCode::CONFLICT,
            Json(ErrorBody::new(
                ErrorKind::NotEligible,
                "Item is not awaiting return to a claimant",
            )),
        )
            .into_response(),
        Err(OtpError::RateLimited {
            retry_after_seconds,
        }) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, retry_after_seconds.to_string())],
            Json(ErrorBody {
                retry_after_seconds: Some(retry_after_seconds),
                ..ErrorBody::new(ErrorKind::RateLimited, "Too many code requests")
            }),
        )
            .into_response(),
        Err(OtpError::Storage(err)) => {
            error!("Failed to issue otp challenge: {err:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Code request failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Check a submitted code.
#[utoipa::path(
    post,
    path = "/otp/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyResponse),
        (status = 400, description = "Wrong code; a missing payload gets an ErrorBody with BadRequest", body = VerifyResponse),
        (status = 410, description = "No live challenge", body = VerifyResponse),
        (status = 429, description = "No attempts left", body = VerifyResponse),
        (status = 503, description = "Storage unavailable", body = String)
    ),
    tag = "otp"
)]
pub async fn verify_challenge(
    service: Extension<Arc<OtpService>>,
    payload: Option<Json<VerifyRequest>>,
) -> impl IntoResponse {
    let request: VerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return bad_request("Missing payload"),
    };

    if request.subject_id.trim().is_empty() || request.code.trim().is_empty() {
        return bad_request("Missing subjectId or code");
    }

    match service.verify(&request.subject_id, &request.code).await {
        Ok(outcome) => {
            let response = VerifyResponse::from(outcome);
            (verify_status(response.result), Json(response)).into_response()
        }
        Err(err) => {
            error!("Failed to verify otp challenge: {err:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

fn verify_status(result: VerifyResult) -> StatusCode {
    match result {
        VerifyResult::Success => StatusCode::OK,
        VerifyResult::Invalid => StatusCode::BAD_REQUEST,
        VerifyResult::Expired => StatusCode::GONE,
        VerifyResult::Exhausted => StatusCode::TOO_MANY_REQUESTS,
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(ErrorKind::BadRequest, message)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{memory::MemoryChallengeStore, ItemStatus, OtpPolicy, Purpose};
    use anyhow::{anyhow, Result};
    use axum::body::to_bytes;
    use uuid::Uuid;

    fn service_with(store: &MemoryChallengeStore) -> Extension<Arc<OtpService>> {
        Extension(Arc::new(OtpService::new(
            Arc::new(store.clone()),
            OtpPolicy::new(),
        )))
    }

    async fn body_json(response: Response) -> Result<serde_json::Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn code_from(store: &MemoryChallengeStore) -> Result<String> {
        let message = store.outbox().pop().ok_or_else(|| anyhow!("no email"))?;
        let payload: serde_json::Value = serde_json::from_str(&message.payload_json)?;
        payload["code"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no code"))
    }

    #[tokio::test]
    async fn request_missing_payload() {
        let store = MemoryChallengeStore::new();
        let response = request_challenge(service_with(&store), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_empty_subject() -> Result<()> {
        let store = MemoryChallengeStore::new();
        let response = request_challenge(
            service_with(&store),
            Some(Json(OtpRequest {
                subject_id: "  ".to_string(),
                purpose: Purpose::ClaimReturn,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await?["errorKind"], "BadRequest");
        Ok(())
    }

    #[tokio::test]
    async fn request_maps_domain_errors() -> Result<()> {
        let found = Uuid::new_v4();
        let store =
            MemoryChallengeStore::new().with_item(found, "Scarf", ItemStatus::Found, None);

        let response = request_challenge(
            service_with(&store),
            Some(Json(OtpRequest {
                subject_id: Uuid::new_v4().to_string(),
                purpose: Purpose::ClaimReturn,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await?["errorKind"], "NotFound");

        let response = request_challenge(
            service_with(&store),
            Some(Json(OtpRequest {
                subject_id: found.to_string(),
                purpose: Purpose::ClaimReturn,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await?["errorKind"], "NotEligible");
        Ok(())
    }

    #[tokio::test]
    async fn request_accepted_then_rate_limited() -> Result<()> {
        let store = MemoryChallengeStore::new().with_account("owner@campus.edu");
        let service = service_with(&store);
        let payload = OtpRequest {
            subject_id: "owner@campus.edu".to_string(),
            purpose: Purpose::PasswordReset,
        };

        let response = request_challenge(service.clone(), Some(Json(payload.clone())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await?["expiresInSeconds"], 300);

        let response = request_challenge(service, Some(Json(payload)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        assert!(retry_header.is_some_and(|seconds| seconds > 0 && seconds <= 60));
        let body = body_json(response).await?;
        assert_eq!(body["errorKind"], "RateLimited");
        assert_eq!(body["retryAfterSeconds"].as_u64(), retry_header);
        Ok(())
    }

    #[tokio::test]
    async fn verify_missing_payload() -> Result<()> {
        let store = MemoryChallengeStore::new();
        let response = verify_challenge(service_with(&store), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await?["errorKind"], "BadRequest");

        let response = verify_challenge(
            service_with(&store),
            Some(Json(VerifyRequest {
                subject_id: Uuid::new_v4().to_string(),
                code: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await?;
        assert_eq!(body["errorKind"], "BadRequest");
        assert_eq!(body["message"], "Missing subjectId or code");
        Ok(())
    }

    #[tokio::test]
    async fn verify_statuses_follow_results() -> Result<()> {
        let item = Uuid::new_v4();
        let store = MemoryChallengeStore::new().with_item(
            item,
            "Calculator",
            ItemStatus::Claimed,
            Some("kim@campus.edu"),
        );
        let service = service_with(&store);

        let verify = |code: &str| VerifyRequest {
            subject_id: item.to_string(),
            code: code.to_string(),
        };

        let response = verify_challenge(service.clone(), Some(Json(verify("123456"))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body_json(response).await?["result"], "Expired");

        let _ = request_challenge(
            service.clone(),
            Some(Json(OtpRequest {
                subject_id: item.to_string(),
                purpose: Purpose::ClaimReturn,
            })),
        )
        .await;
        let code = code_from(&store)?;
        let wrong: String = code
            .chars()
            .map(|c| if c == '9' { '8' } else { '9' })
            .collect();

        let response = verify_challenge(service.clone(), Some(Json(verify(&wrong))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await?;
        assert_eq!(body["result"], "Invalid");
        assert_eq!(body["attemptsRemaining"], 2);
        assert!(!body.to_string().contains(&wrong));

        let response = verify_challenge(service.clone(), Some(Json(verify(&code))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await?["result"], "Success");
        assert_eq!(store.item_status(item), Some(ItemStatus::Returned));
        Ok(())
    }

    #[test]
    fn exhausted_maps_to_too_many_requests() {
        assert_eq!(
            verify_status(VerifyResult::Exhausted),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(verify_status(VerifyResult::Expired), StatusCode::GONE);
    }
}
