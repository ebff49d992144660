//! Initiator and Verifier.
//!
//! Every operation runs inside one [`SubjectTxn`](super::store::SubjectTxn):
//! load, apply the pure transition from [`OtpChallenge`], write back, commit.
//! Errors before commit drop the transaction and leave the subject untouched.

use anyhow::Context;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    challenge::{OtpChallenge, Verdict},
    crypto, normalize_subject,
    policy::OtpPolicy,
    store::{ChallengeStore, Subject},
    valid_email, ItemStatus, OtpError, Purpose, ResetError, VerifyOutcome,
};
use crate::email::EmailMessage;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// A code was issued and queued for delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub expires_in_seconds: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OtpService {
    store: Arc<dyn ChallengeStore>,
    policy: OtpPolicy,
}

impl OtpService {
    #[must_use]
    pub fn new(store: Arc<dyn ChallengeStore>, policy: OtpPolicy) -> Self {
        Self {
            store,
            policy: policy.normalize(),
        }
    }

    /// Issue a fresh code for `subject_id`, replacing any live challenge.
    ///
    /// # Errors
    /// `NotFound`, `NotEligible`, `RateLimited`, or `Storage`.
    pub async fn request_challenge(
        &self,
        subject_id: &str,
        purpose: Purpose,
    ) -> Result<IssuedChallenge, OtpError> {
        self.request_challenge_at(subject_id, purpose, Utc::now())
            .await
    }

    /// [`request_challenge`](Self::request_challenge) with an explicit clock.
    ///
    /// # Errors
    /// `NotFound`, `NotEligible`, `RateLimited`, or `Storage`.
    pub async fn request_challenge_at(
        &self,
        subject_id: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, OtpError> {
        let subject_id = normalize_subject(subject_id);
        if subject_id.is_empty()
            || (purpose == Purpose::PasswordReset && !valid_email(&subject_id))
        {
            return Err(OtpError::NotFound);
        }

        let mut txn = self.store.begin(&subject_id).await?;

        let subject = txn
            .load_subject(purpose)
            .await?
            .ok_or(OtpError::NotFound)?;
        let (recipient, item_title) = match subject {
            Subject::Item {
                title,
                status,
                claimant_email,
                ..
            } => {
                if status != ItemStatus::Claimed {
                    return Err(OtpError::NotEligible);
                }
                let recipient = claimant_email.ok_or(OtpError::NotEligible)?;
                (recipient, Some(title))
            }
            Subject::Account { email } => (email, None),
        };

        let previous = txn.load_challenge().await?;
        let requests = match self
            .policy
            .admit_request(previous.as_ref().map(|challenge| &challenge.requests), now)
        {
            Ok(requests) => requests,
            Err(err) => {
                warn!(subject_id = %subject_id, purpose = %purpose, "otp request rate limited");
                return Err(err);
            }
        };

        let code = crypto::generate_code(self.policy.code_length());
        let challenge = OtpChallenge::issue(
            &subject_id,
            purpose,
            crypto::hash_code(&subject_id, code.expose_secret()),
            requests,
            &self.policy,
            now,
        );
        let expires_in_seconds = u64::try_from(self.policy.code_ttl_seconds()).unwrap_or(0);

        let payload = json!({
            "subject_id": subject_id,
            "purpose": purpose,
            "code": code.expose_secret(),
            "expires_in_seconds": expires_in_seconds,
            "item_title": item_title,
        });
        let message = EmailMessage {
            to_email: recipient,
            template: purpose.email_template().to_string(),
            payload_json: serde_json::to_string(&payload)
                .context("failed to serialize email payload")?,
        };

        txn.save_challenge(&challenge).await?;
        txn.enqueue_email(&message).await?;
        txn.commit().await?;

        info!(
            subject_id = %subject_id,
            purpose = %purpose,
            challenge_id = %challenge.challenge_id,
            replaced = previous.is_some(),
            "otp challenge issued"
        );

        Ok(IssuedChallenge {
            expires_in_seconds,
            expires_at: challenge.expires_at,
        })
    }

    /// Check a submitted code and run the subject's success action.
    ///
    /// # Errors
    /// Only `Storage`; every verification result is an `Ok` outcome.
    pub async fn verify(&self, subject_id: &str, code: &str) -> Result<VerifyOutcome, OtpError> {
        self.verify_at(subject_id, code, Utc::now()).await
    }

    /// [`verify`](Self::verify) with an explicit clock.
    ///
    /// # Errors
    /// Only `Storage`; every verification result is an `Ok` outcome.
    pub async fn verify_at(
        &self,
        subject_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, OtpError> {
        let subject_id = normalize_subject(subject_id);
        let mut txn = self.store.begin(&subject_id).await?;

        let Some(mut challenge) = txn.load_challenge().await? else {
            return Ok(VerifyOutcome::Expired);
        };
        let before = challenge.clone();
        let verdict = challenge.verify(&crypto::hash_code(&subject_id, code), now);

        let purpose = challenge.purpose;
        let outcome = match verdict {
            Verdict::Accepted => match purpose {
                Purpose::ClaimReturn => {
                    let item_id = Uuid::parse_str(&subject_id)
                        .context("claim challenge subject is not an item id")?;
                    if txn.mark_item_returned(item_id).await? {
                        VerifyOutcome::Success { reset_token: None }
                    } else {
                        warn!(
                            subject_id = %subject_id,
                            "item no longer awaiting return, code withdrawn"
                        );
                        challenge.withdraw();
                        VerifyOutcome::Expired
                    }
                }
                Purpose::PasswordReset => {
                    let token = crypto::generate_reset_token()?;
                    txn.insert_reset_grant(
                        &crypto::hash_reset_token(&token),
                        now + self.policy.reset_grant_ttl(),
                    )
                    .await?;
                    VerifyOutcome::Success {
                        reset_token: Some(token),
                    }
                }
            },
            Verdict::Rejected { attempts_remaining } => {
                VerifyOutcome::Invalid { attempts_remaining }
            }
            Verdict::Expired => VerifyOutcome::Expired,
            Verdict::Exhausted => VerifyOutcome::Exhausted,
        };

        if challenge != before {
            txn.save_challenge(&challenge).await?;
        }
        txn.commit().await?;

        info!(
            subject_id = %subject_id,
            purpose = %purpose,
            challenge_id = %challenge.challenge_id,
            result = outcome_label(&outcome),
            state = ?challenge.state(now),
            attempts_remaining = challenge.attempts_remaining,
            "otp verification"
        );

        Ok(outcome)
    }

    /// Set a new password using the token returned by a password reset verify.
    ///
    /// # Errors
    /// `WeakPassword`, `InvalidGrant`, or `Storage`.
    pub async fn reset_password(
        &self,
        email: &str,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), ResetError> {
        self.reset_password_at(email, reset_token, new_password, Utc::now())
            .await
    }

    /// [`reset_password`](Self::reset_password) with an explicit clock.
    ///
    /// # Errors
    /// `WeakPassword`, `InvalidGrant`, or `Storage`.
    pub async fn reset_password_at(
        &self,
        email: &str,
        reset_token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ResetError> {
        let length = new_password.chars().count();
        if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
            return Err(ResetError::WeakPassword {
                min: MIN_PASSWORD_LENGTH,
                max: MAX_PASSWORD_LENGTH,
            });
        }

        let email = normalize_subject(email);
        if !valid_email(&email) || reset_token.trim().is_empty() {
            return Err(ResetError::InvalidGrant);
        }

        let mut txn = self.store.begin(&email).await?;
        if !txn
            .consume_reset_grant(&crypto::hash_reset_token(reset_token), now)
            .await?
        {
            warn!(email = %email, "password reset with unusable grant");
            return Err(ResetError::InvalidGrant);
        }

        let password_hash = crypto::hash_password(new_password)?;
        txn.set_password_hash(&password_hash).await?;
        txn.commit().await?;

        info!(email = %email, "password reset completed");
        Ok(())
    }

    /// Storage liveness for `/health`.
    ///
    /// # Errors
    /// Returns an error if the backing store is unreachable.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.store.ping().await
    }
}

fn outcome_label(outcome: &VerifyOutcome) -> &'static str {
    match outcome {
        VerifyOutcome::Success { .. } => "Success",
        VerifyOutcome::Invalid { .. } => "Invalid",
        VerifyOutcome::Expired => "Expired",
        VerifyOutcome::Exhausted => "Exhausted",
    }
}
