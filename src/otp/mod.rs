//! One-time code challenges for claim returns and password resets.
//!
//! The pieces fit together like this:
//!
//! - [`challenge`] holds the `OtpChallenge` record and its state machine.
//! - [`policy`] decides how long codes live, how many guesses are allowed, and
//!   how often a subject may ask for a new code.
//! - [`store`] is the per-subject unit of work the service runs inside.
//!   [`postgres`] backs it with `sqlx`, [`memory`] with a mutex-guarded map.
//! - [`service`] is the Initiator and Verifier used by the HTTP handlers.

pub mod challenge;
pub mod crypto;
pub mod memory;
pub mod policy;
pub mod postgres;
pub mod service;
pub mod store;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

pub use challenge::{ChallengeState, OtpChallenge, RequestWindow, Verdict};
pub use policy::OtpPolicy;
pub use service::{IssuedChallenge, OtpService};
pub use store::{ChallengeStore, Subject, SubjectTxn};

/// What a challenge protects.
#[derive(ToSchema, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    /// Hand-over of a claimed item to its claimant.
    ClaimReturn,
    /// Recovery of a forgotten account password.
    PasswordReset,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClaimReturn => "ClaimReturn",
            Self::PasswordReset => "PasswordReset",
        }
    }

    /// Outbox template used to deliver the code.
    #[must_use]
    pub const fn email_template(self) -> &'static str {
        match self {
            Self::ClaimReturn => "claim_return_code",
            Self::PasswordReset => "password_reset_code",
        }
    }

    /// Parse the stored or CLI form of a purpose.
    ///
    /// Accepts the wire names and the kebab-case CLI names.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "ClaimReturn" | "claim-return" => Some(Self::ClaimReturn),
            "PasswordReset" | "password-reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a lost and found item, as stored by the item service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemStatus {
    Lost,
    Found,
    Claimed,
    Returned,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lost => "Lost",
            Self::Found => "Found",
            Self::Claimed => "Claimed",
            Self::Returned => "Returned",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Lost" => Some(Self::Lost),
            "Found" => Some(Self::Found),
            "Claimed" => Some(Self::Claimed),
            "Returned" => Some(Self::Returned),
            _ => None,
        }
    }
}

/// Result of a verification attempt as seen by callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code matched. Password resets carry the single-use reset token.
    Success { reset_token: Option<String> },
    Invalid { attempts_remaining: u32 },
    Expired,
    Exhausted,
}

/// Failures of the Initiator. Each kind is surfaced to callers separately.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("subject not found")]
    NotFound,
    #[error("subject is not eligible for this code")]
    NotEligible,
    #[error("too many code requests, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Failures when completing a password reset.
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("reset token is invalid, used, or expired")]
    InvalidGrant,
    #[error("password must be between {min} and {max} characters")]
    WeakPassword { min: usize, max: usize },
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Normalize a subject identifier for lookups and locking.
///
/// Item ids are UUIDs and accounts are emails; both compare case-insensitively.
#[must_use]
pub fn normalize_subject(subject_id: &str) -> String {
    subject_id.trim().to_lowercase()
}

/// Loose shape check for account emails.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
