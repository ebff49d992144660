//! Request/response types shared by the handlers and [`crate::client`].
//!
//! Field names are camelCase on the wire. Types carrying a code, reset token,
//! or password redact it in `Debug`.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::otp::{Purpose, VerifyOutcome};

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequest {
    /// Item id for `ClaimReturn`, account email for `PasswordReset`.
    pub subject_id: String,
    pub purpose: Purpose,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequestAccepted {
    pub expires_in_seconds: u64,
}

/// Failure kinds for `/otp/request` and `/password/reset`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotEligible,
    RateLimited,
    WeakPassword,
    InvalidGrant,
    BadRequest,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind,
            retry_after_seconds: None,
            message: message.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub subject_id: String,
    pub code: String,
}

impl fmt::Debug for VerifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyRequest")
            .field("subject_id", &self.subject_id)
            .field("code", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Success,
    Invalid,
    Expired,
    Exhausted,
}

#[derive(ToSchema, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub result: VerifyResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
    /// Present only for a successful `PasswordReset` verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

impl fmt::Debug for VerifyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyResponse")
            .field("result", &self.result)
            .field("attempts_remaining", &self.attempts_remaining)
            .field("reset_token", &self.reset_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        let (result, attempts_remaining, reset_token) = match outcome {
            VerifyOutcome::Success { reset_token } => (VerifyResult::Success, None, reset_token),
            VerifyOutcome::Invalid { attempts_remaining } => {
                (VerifyResult::Invalid, Some(attempts_remaining), None)
            }
            VerifyOutcome::Expired => (VerifyResult::Expired, None, None),
            VerifyOutcome::Exhausted => (VerifyResult::Exhausted, None, None),
        };
        Self {
            result,
            attempts_remaining,
            reset_token,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub email: String,
    pub reset_token: String,
    pub new_password: String,
}

impl fmt::Debug for PasswordResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResetRequest")
            .field("email", &self.email)
            .field("reset_token", &"***")
            .field("new_password", &"***")
            .finish()
    }
}
