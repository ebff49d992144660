//! PostgreSQL-backed [`ChallengeStore`].
//!
//! `begin` opens a transaction and takes `pg_advisory_xact_lock` on a hash of
//! the subject id, so every issue and verify for one subject runs serially
//! across all server instances. The challenge row is additionally read with
//! `FOR UPDATE`. Both locks are released on commit or rollback.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    challenge::{OtpChallenge, RequestWindow},
    normalize_subject,
    store::{ChallengeStore, Subject, SubjectTxn},
    ItemStatus, Purpose,
};
use crate::email::EmailMessage;

#[derive(Clone, Debug)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn begin(&self, subject_id: &str) -> Result<Box<dyn SubjectTxn>> {
        let subject_id = normalize_subject(subject_id);
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin otp transaction")?;

        let query = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&subject_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock otp subject")?;

        Ok(Box::new(PgSubjectTxn { subject_id, tx }))
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

struct PgSubjectTxn {
    subject_id: String,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SubjectTxn for PgSubjectTxn {
    async fn load_subject(&mut self, purpose: Purpose) -> Result<Option<Subject>> {
        match purpose {
            Purpose::ClaimReturn => {
                let Ok(item_id) = Uuid::parse_str(&self.subject_id) else {
                    return Ok(None);
                };
                let query = "SELECT id, title, status, claimant_email FROM items WHERE id = $1";
                let span = tracing::info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let row = sqlx::query(query)
                    .bind(item_id)
                    .fetch_optional(&mut *self.tx)
                    .instrument(span)
                    .await
                    .context("failed to lookup item")?;

                row.map(|row| -> Result<Subject> {
                    let status: String = row.get("status");
                    let status = ItemStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown item status: {status}"))?;
                    let claimant_email: Option<String> = row.get("claimant_email");
                    Ok(Subject::Item {
                        id: row.get("id"),
                        title: row.get("title"),
                        status,
                        claimant_email: claimant_email.as_deref().map(normalize_subject),
                    })
                })
                .transpose()
            }
            Purpose::PasswordReset => {
                let query = "SELECT email FROM accounts WHERE email = $1";
                let span = tracing::info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let row = sqlx::query(query)
                    .bind(&self.subject_id)
                    .fetch_optional(&mut *self.tx)
                    .instrument(span)
                    .await
                    .context("failed to lookup account")?;

                Ok(row.map(|row| Subject::Account {
                    email: row.get("email"),
                }))
            }
        }
    }

    async fn load_challenge(&mut self) -> Result<Option<OtpChallenge>> {
        let query = r"
            SELECT challenge_id, subject_id, purpose, code_hash, issued_at, expires_at,
                   attempts_remaining, consumed_at, verified_at,
                   request_count, window_started_at, last_requested_at
            FROM otp_challenges
            WHERE subject_id = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&self.subject_id)
            .fetch_optional(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to load otp challenge")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let purpose: String = row.get("purpose");
        let purpose =
            Purpose::parse(&purpose).ok_or_else(|| anyhow!("unknown otp purpose: {purpose}"))?;
        let attempts: i32 = row.get("attempts_remaining");
        let request_count: i32 = row.get("request_count");

        Ok(Some(OtpChallenge {
            challenge_id: row.get("challenge_id"),
            subject_id: row.get("subject_id"),
            purpose,
            code_hash: row.get("code_hash"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            attempts_remaining: u32::try_from(attempts).unwrap_or(0),
            consumed_at: row.get("consumed_at"),
            verified_at: row.get("verified_at"),
            requests: RequestWindow {
                count: u32::try_from(request_count).unwrap_or(0),
                started_at: row.get("window_started_at"),
                last_requested_at: row.get("last_requested_at"),
            },
        }))
    }

    async fn save_challenge(&mut self, challenge: &OtpChallenge) -> Result<()> {
        let query = r"
            INSERT INTO otp_challenges
                (subject_id, challenge_id, purpose, code_hash, issued_at, expires_at,
                 attempts_remaining, consumed_at, verified_at,
                 request_count, window_started_at, last_requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (subject_id) DO UPDATE SET
                challenge_id = EXCLUDED.challenge_id,
                purpose = EXCLUDED.purpose,
                code_hash = EXCLUDED.code_hash,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                attempts_remaining = EXCLUDED.attempts_remaining,
                consumed_at = EXCLUDED.consumed_at,
                verified_at = EXCLUDED.verified_at,
                request_count = EXCLUDED.request_count,
                window_started_at = EXCLUDED.window_started_at,
                last_requested_at = EXCLUDED.last_requested_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&self.subject_id)
            .bind(challenge.challenge_id)
            .bind(challenge.purpose.as_str())
            .bind(&challenge.code_hash)
            .bind(challenge.issued_at)
            .bind(challenge.expires_at)
            .bind(i32::try_from(challenge.attempts_remaining).unwrap_or(i32::MAX))
            .bind(challenge.consumed_at)
            .bind(challenge.verified_at)
            .bind(i32::try_from(challenge.requests.count).unwrap_or(i32::MAX))
            .bind(challenge.requests.started_at)
            .bind(challenge.requests.last_requested_at)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to save otp challenge")?;
        Ok(())
    }

    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()> {
        let query = r"
            UPDATE email_outbox
            SET status = 'superseded', payload_json = payload_json - 'code'
            WHERE subject_id = $1 AND status = 'pending'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&self.subject_id)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to withdraw pending outbox rows")?;

        let query = r"
            INSERT INTO email_outbox (subject_id, to_email, template, payload_json)
            VALUES ($1, $2, $3, $4::jsonb)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&self.subject_id)
            .bind(&message.to_email)
            .bind(&message.template)
            .bind(&message.payload_json)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to insert email outbox row")?;
        Ok(())
    }

    async fn mark_item_returned(&mut self, item_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE items SET status = 'Returned', updated_at = NOW()
            WHERE id = $1 AND status = 'Claimed'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(item_id)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to mark item returned")?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_reset_grant(
        &mut self,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO password_reset_grants (token_hash, email, expires_at)
            VALUES ($1, $2, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(&self.subject_id)
            .bind(expires_at)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to insert password reset grant")?;
        Ok(())
    }

    async fn consume_reset_grant(
        &mut self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            UPDATE password_reset_grants
            SET consumed_at = $3
            WHERE token_hash = $1
              AND email = $2
              AND consumed_at IS NULL
              AND expires_at > $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(&self.subject_id)
            .bind(now)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to consume password reset grant")?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_password_hash(&mut self, password_hash: &str) -> Result<()> {
        let query = "UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&self.subject_id)
            .bind(password_hash)
            .execute(&mut *self.tx)
            .instrument(span)
            .await
            .context("failed to update account password")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit otp transaction")
    }
}
