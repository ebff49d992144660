//! The stored challenge record and its state machine.
//!
//! ```text
//!            verify ok
//! Pending ───────────────▶ Verified
//!    │  now >= expires_at
//!    ├───────────────────▶ Expired
//!    │  attempts_remaining == 0
//!    └───────────────────▶ Exhausted
//! ```
//!
//! All transitions are computed here without I/O; stores load a challenge,
//! call [`OtpChallenge::verify`], and persist the mutated record inside the
//! same per-subject transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{crypto, policy::OtpPolicy, Purpose};

/// Request bookkeeping carried across challenge replacements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestWindow {
    /// Requests admitted since `started_at`.
    pub count: u32,
    pub started_at: DateTime<Utc>,
    pub last_requested_at: DateTime<Utc>,
}

impl RequestWindow {
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            started_at: now,
            last_requested_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    Pending,
    Verified,
    Expired,
    Exhausted,
}

/// Outcome of checking a submitted code against a challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected { attempts_remaining: u32 },
    Expired,
    Exhausted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Changes every time the subject's challenge is replaced.
    pub challenge_id: Uuid,
    pub subject_id: String,
    pub purpose: Purpose,
    /// SHA-256 of `subject_id:code`; the raw code is never stored.
    pub code_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: u32,
    pub consumed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub requests: RequestWindow,
}

impl OtpChallenge {
    /// Build a fresh pending challenge for an already admitted request.
    #[must_use]
    pub fn issue(
        subject_id: &str,
        purpose: Purpose,
        code_hash: Vec<u8>,
        requests: RequestWindow,
        policy: &OtpPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            challenge_id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            purpose,
            code_hash,
            issued_at: now,
            expires_at: now + policy.code_ttl(),
            attempts_remaining: policy.max_attempts(),
            consumed_at: None,
            verified_at: None,
            requests,
        }
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> ChallengeState {
        if self.verified_at.is_some() {
            ChallengeState::Verified
        } else if self.is_consumed() || self.is_expired_at(now) {
            ChallengeState::Expired
        } else if self.attempts_remaining == 0 {
            ChallengeState::Exhausted
        } else {
            ChallengeState::Pending
        }
    }

    /// Take back an acceptance whose success action could not run. The code
    /// stays spent.
    pub fn withdraw(&mut self) {
        self.verified_at = None;
    }

    /// Check `submitted_hash` and apply the resulting transition.
    ///
    /// Order matters: consumed and expired challenges report `Expired` before
    /// attempts are looked at, and exhausted challenges never compare codes.
    pub fn verify(&mut self, submitted_hash: &[u8], now: DateTime<Utc>) -> Verdict {
        if self.is_consumed() {
            return Verdict::Expired;
        }

        if self.is_expired_at(now) {
            self.consumed_at = Some(now);
            return Verdict::Expired;
        }

        if self.attempts_remaining == 0 {
            return Verdict::Exhausted;
        }

        if !crypto::digests_match(&self.code_hash, submitted_hash) {
            self.attempts_remaining -= 1;
            return Verdict::Rejected {
                attempts_remaining: self.attempts_remaining,
            };
        }

        self.consumed_at = Some(now);
        self.verified_at = Some(now);
        Verdict::Accepted
    }
}
