//! Per-subject unit of work used by the OTP service.
//!
//! A [`ChallengeStore`] hands out a [`SubjectTxn`] that holds exclusive access
//! to one subject until it is committed or dropped. Everything the Initiator
//! and Verifier read or write for that subject goes through the same
//! transaction, which gives compare-and-swap semantics on the challenge:
//! whoever holds the transaction sees the latest state and nobody else can
//! change it underneath. Dropping a transaction without committing discards
//! its writes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{challenge::OtpChallenge, ItemStatus, Purpose};
use crate::email::EmailMessage;

/// The entity a challenge protects, as read from the owning tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Item {
        id: Uuid,
        title: String,
        status: ItemStatus,
        claimant_email: Option<String>,
    },
    Account {
        email: String,
    },
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Open a transaction with exclusive access to `subject_id`.
    async fn begin(&self, subject_id: &str) -> Result<Box<dyn SubjectTxn>>;

    /// Liveness check used by `/health`.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait SubjectTxn: Send {
    /// Load the subject row matching the purpose (item or account).
    async fn load_subject(&mut self, purpose: Purpose) -> Result<Option<Subject>>;

    /// Load the subject's current challenge, live or not.
    async fn load_challenge(&mut self) -> Result<Option<OtpChallenge>>;

    /// Insert or replace the subject's challenge.
    async fn save_challenge(&mut self, challenge: &OtpChallenge) -> Result<()>;

    /// Queue an email for delivery once the transaction commits. Emails still
    /// pending for this subject are withdrawn.
    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()>;

    /// Claim-return success action. Returns `false` if the item is no longer
    /// `Claimed`.
    async fn mark_item_returned(&mut self, item_id: Uuid) -> Result<bool>;

    /// Password-reset success action: store a reset grant for the account.
    async fn insert_reset_grant(
        &mut self,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Consume an unexpired, unused reset grant. Returns `false` if none matched.
    async fn consume_reset_grant(&mut self, token_hash: &[u8], now: DateTime<Utc>)
        -> Result<bool>;

    async fn set_password_hash(&mut self, password_hash: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
