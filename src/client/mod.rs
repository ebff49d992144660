//! HTTP client for the code endpoints.
//!
//! [`OtpClient`] speaks the JSON contract served by [`crate::api`] and turns
//! every non-success response into a [`ClientError`]. Transport failures,
//! timeouts, and 5xx responses all become [`ClientError::NetworkFailure`], the
//! only retryable kind.

pub mod form;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::api::types::{
    ErrorBody, ErrorKind, OtpRequest, OtpRequestAccepted, PasswordResetRequest, VerifyRequest,
    VerifyResponse, VerifyResult,
};
use crate::APP_USER_AGENT;

pub use form::{FormError, OtpForm, RequestSubmission, VerifySubmission};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("no matching item or account")]
    NotFound,
    #[error("subject is not eligible for a code")]
    NotEligible,
    #[error("too many code requests")]
    RateLimited { retry_after_seconds: Option<u64> },
    #[error("wrong code")]
    Invalid { attempts_remaining: Option<u32> },
    #[error("code expired")]
    Expired,
    #[error("no attempts left")]
    Exhausted,
    #[error("password does not meet the length rules")]
    WeakPassword,
    #[error("reset token is invalid or expired")]
    InvalidGrant,
    #[error("request rejected: {0}")]
    BadRequest(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("unexpected response status {status}")]
    Unexpected { status: u16 },
}

impl ClientError {
    /// Only transport problems can be fixed by sending the same form again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// Text shown next to the form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "We could not find that item or account.".to_string(),
            Self::NotEligible => "This item is not waiting to be returned.".to_string(),
            Self::RateLimited {
                retry_after_seconds: Some(seconds),
            } => format!("Too many code requests. Try again in {seconds} seconds."),
            Self::RateLimited {
                retry_after_seconds: None,
            } => "Too many code requests. Try again later.".to_string(),
            Self::Invalid {
                attempts_remaining: Some(1),
            } => "That code is not correct. 1 attempt left.".to_string(),
            Self::Invalid {
                attempts_remaining: Some(remaining),
            } => format!("That code is not correct. {remaining} attempts left."),
            Self::Invalid {
                attempts_remaining: None,
            } => "That code is not correct.".to_string(),
            Self::Expired => "This code has expired. Request a new one.".to_string(),
            Self::Exhausted => "Too many wrong codes. Request a new one.".to_string(),
            Self::WeakPassword => "Choose a password between 8 and 128 characters.".to_string(),
            Self::InvalidGrant => {
                "This reset is no longer valid. Request a new code.".to_string()
            }
            Self::BadRequest(_) => "Fill in every field and try again.".to_string(),
            Self::NetworkFailure(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Unexpected { status } => format!("Something went wrong (HTTP {status})."),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkFailure(err.to_string())
    }
}

/// Map a non-success response to an error kind.
///
/// 5xx is always a network failure. 4xx bodies carry either `errorKind` or
/// `result`; anything else is `Unexpected`.
#[must_use]
pub fn classify(status: StatusCode, body: &[u8]) -> ClientError {
    if status.is_server_error() {
        return ClientError::NetworkFailure(format!("server returned {status}"));
    }

    if let Ok(error) = serde_json::from_slice::<ErrorBody>(body) {
        return match error.error_kind {
            ErrorKind::NotFound => ClientError::NotFound,
            ErrorKind::NotEligible => ClientError::NotEligible,
            ErrorKind::RateLimited => ClientError::RateLimited {
                retry_after_seconds: error.retry_after_seconds,
            },
            ErrorKind::WeakPassword => ClientError::WeakPassword,
            ErrorKind::InvalidGrant => ClientError::InvalidGrant,
            ErrorKind::BadRequest => ClientError::BadRequest(error.message),
        };
    }

    if let Ok(verify) = serde_json::from_slice::<VerifyResponse>(body) {
        return match verify.result {
            VerifyResult::Invalid => ClientError::Invalid {
                attempts_remaining: verify.attempts_remaining,
            },
            VerifyResult::Expired => ClientError::Expired,
            VerifyResult::Exhausted => ClientError::Exhausted,
            VerifyResult::Success => ClientError::Unexpected {
                status: status.as_u16(),
            },
        };
    }

    ClientError::Unexpected {
        status: status.as_u16(),
    }
}

#[derive(Clone, Debug)]
pub struct OtpClient {
    http: Client,
    request_url: Url,
    verify_url: Url,
    reset_url: Url,
}

impl OtpClient {
    /// Build a client for the API rooted at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("Invalid API URL: {base_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            request_url: base.join("otp/request")?,
            verify_url: base.join("otp/verify")?,
            reset_url: base.join("password/reset")?,
        })
    }

    /// `POST /otp/request`.
    ///
    /// # Errors
    /// Any [`ClientError`] kind the endpoint can produce.
    pub async fn request_challenge(
        &self,
        submission: &RequestSubmission,
    ) -> Result<OtpRequestAccepted, ClientError> {
        let body = OtpRequest {
            subject_id: submission.subject_id.clone(),
            purpose: submission.purpose,
        };
        let response = self
            .http
            .post(self.request_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(status = status.as_u16(), "otp request response");

        if status == StatusCode::ACCEPTED {
            return serde_json::from_slice(&bytes).map_err(|_| ClientError::Unexpected {
                status: status.as_u16(),
            });
        }
        Err(classify(status, &bytes))
    }

    /// `POST /otp/verify`. `Ok` only for a successful verification.
    ///
    /// # Errors
    /// `Invalid`, `Expired`, `Exhausted`, `NetworkFailure`, or `Unexpected`.
    pub async fn verify(&self, submission: &VerifySubmission) -> Result<VerifyResponse, ClientError> {
        let body = VerifyRequest {
            subject_id: submission.subject_id.clone(),
            code: submission.code.expose_secret().to_string(),
        };
        let response = self
            .http
            .post(self.verify_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(status = status.as_u16(), "otp verify response");

        if status == StatusCode::OK {
            return match serde_json::from_slice::<VerifyResponse>(&bytes) {
                Ok(verified) if verified.result == VerifyResult::Success => Ok(verified),
                _ => Err(ClientError::Unexpected {
                    status: status.as_u16(),
                }),
            };
        }
        Err(classify(status, &bytes))
    }

    /// `POST /password/reset`.
    ///
    /// # Errors
    /// `WeakPassword`, `InvalidGrant`, `NetworkFailure`, or `Unexpected`.
    pub async fn reset_password(
        &self,
        email: &str,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), ClientError> {
        let body = PasswordResetRequest {
            email: email.to_string(),
            reset_token: reset_token.to_string(),
            new_password: new_password.to_string(),
        };
        let response = self
            .http
            .post(self.reset_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let bytes = response.bytes().await?;
        Err(classify(status, &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap_or_default()
    }

    #[test]
    fn server_errors_are_retryable_network_failures() {
        let err = classify(StatusCode::SERVICE_UNAVAILABLE, b"Code request failed");
        assert!(matches!(err, ClientError::NetworkFailure(_)));
        assert!(err.is_retryable());

        let err = classify(
            StatusCode::BAD_GATEWAY,
            &body(&json!({ "errorKind": "NotFound" })),
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn request_errors_by_kind() {
        assert_eq!(
            classify(
                StatusCode::NOT_FOUND,
                &body(&json!({ "errorKind": "NotFound", "message": "x" }))
            ),
            ClientError::NotFound
        );
        assert_eq!(
            classify(
                StatusCode::CONFLICT,
                &body(&json!({ "errorKind": "NotEligible" }))
            ),
            ClientError::NotEligible
        );
        assert_eq!(
            classify(
                StatusCode::TOO_MANY_REQUESTS,
                &body(&json!({ "errorKind": "RateLimited", "retryAfterSeconds": 30 }))
            ),
            ClientError::RateLimited {
                retry_after_seconds: Some(30)
            }
        );
    }

    #[test]
    fn verify_results_by_kind() {
        assert_eq!(
            classify(
                StatusCode::BAD_REQUEST,
                &body(&json!({ "result": "Invalid", "attemptsRemaining": 2 }))
            ),
            ClientError::Invalid {
                attempts_remaining: Some(2)
            }
        );
        assert_eq!(
            classify(StatusCode::GONE, &body(&json!({ "result": "Expired" }))),
            ClientError::Expired
        );
        assert_eq!(
            classify(
                StatusCode::TOO_MANY_REQUESTS,
                &body(&json!({ "result": "Exhausted" }))
            ),
            ClientError::Exhausted
        );
    }

    #[test]
    fn bad_request_body_keeps_server_message() {
        assert_eq!(
            classify(
                StatusCode::BAD_REQUEST,
                &body(&json!({ "errorKind": "BadRequest", "message": "Missing subjectId or code" }))
            ),
            ClientError::BadRequest("Missing subjectId or code".to_string())
        );
    }

    #[test]
    fn unparsable_client_errors_are_unexpected() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, b"Missing payload"),
            ClientError::Unexpected { status: 400 }
        );
        assert!(!ClientError::Unexpected { status: 400 }.is_retryable());
    }

    #[test]
    fn every_kind_has_its_own_message() {
        let kinds = [
            ClientError::NotFound,
            ClientError::NotEligible,
            ClientError::RateLimited {
                retry_after_seconds: Some(5),
            },
            ClientError::Invalid {
                attempts_remaining: Some(2),
            },
            ClientError::Expired,
            ClientError::Exhausted,
            ClientError::WeakPassword,
            ClientError::InvalidGrant,
            ClientError::BadRequest("Missing payload".to_string()),
            ClientError::NetworkFailure("timeout".to_string()),
            ClientError::Unexpected { status: 418 },
        ];
        let mut messages: Vec<String> = kinds.iter().map(ClientError::user_message).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), kinds.len());
        assert!(kinds
            .iter()
            .filter(|kind| kind.is_retryable())
            .all(|kind| matches!(kind, ClientError::NetworkFailure(_))));
    }

    #[test]
    fn invalid_message_counts_attempts() {
        let one = ClientError::Invalid {
            attempts_remaining: Some(1),
        };
        assert_eq!(one.user_message(), "That code is not correct. 1 attempt left.");
        let none = ClientError::Invalid {
            attempts_remaining: Some(0),
        };
        assert_eq!(none.user_message(), "That code is not correct. 0 attempts left.");
    }

    #[test]
    fn client_urls_keep_base_path() -> anyhow::Result<()> {
        let client = OtpClient::new("https://lostfound.campus.edu/api", Duration::from_secs(5))?;
        assert_eq!(
            client.request_url.as_str(),
            "https://lostfound.campus.edu/api/otp/request"
        );
        assert_eq!(
            client.reset_url.as_str(),
            "https://lostfound.campus.edu/api/password/reset"
        );
        assert!(OtpClient::new("not a url", Duration::from_secs(5)).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_server_is_network_failure() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let client = OtpClient::new(&format!("http://{addr}"), Duration::from_secs(2))?;
        let submission = RequestSubmission {
            subject_id: "owner@campus.edu".to_string(),
            purpose: crate::otp::Purpose::PasswordReset,
        };
        let err = client.request_challenge(&submission).await;
        assert!(matches!(err, Err(ClientError::NetworkFailure(_))));
        Ok(())
    }
}
