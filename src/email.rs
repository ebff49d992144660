//! Email outbox delivery.
//!
//! Code requests write a row to `email_outbox` inside the challenge
//! transaction, so a code is only delivered if its challenge was stored and a
//! stored challenge always has a queued email. A background task drains the
//! outbox:
//!
//! 1. lock a batch of due `pending` rows with `FOR UPDATE SKIP LOCKED`
//!    (several instances can poll without double-sending);
//! 2. hand each row to an [`EmailSender`];
//! 3. mark it `sent`, or reschedule it with exponential backoff and jitter
//!    until `max_attempts` is reached, then mark it `failed`.
//!
//! The payload carries the plaintext code under `code`. It is removed as soon
//! as a row is `sent` or `failed`, and a pending row is marked `superseded`
//! (code removed) when its subject is issued a new code.
//!
//! [`LogEmailSender`] is the local development sender.

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    /// Template variables. Contains the code, so it is never logged.
    pub payload_json: String,
}

impl fmt::Debug for EmailMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailMessage")
            .field("to_email", &self.to_email)
            .field("template", &self.template)
            .field("payload_json", &"***")
            .finish()
    }
}

pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    ///
    /// # Errors
    /// Returns an error if delivery failed.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Logs recipients and templates instead of sending mail.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            "email outbox send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboxConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OutboxConfig {
    /// 5s poll, 10 rows per batch, 5 attempts, 5s to 5m backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Replace zero values with the smallest usable ones.
    #[must_use]
    pub fn normalize(self) -> Self {
        let one_second = Duration::from_secs(1);
        let backoff_base = self.backoff_base.max(one_second);
        Self {
            poll_interval: self.poll_interval.max(one_second),
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the outbox poller.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: OutboxConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        loop {
            match drain_outbox(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "email outbox batch processed"),
                Err(err) => error!("email outbox batch failed: {err:#}"),
            }
            sleep(config.poll_interval()).await;
        }
    })
}

/// Deliver one batch of due emails. Returns the number of rows handled.
///
/// # Errors
/// Returns an error if the batch cannot be loaded or a row cannot be updated.
pub async fn drain_outbox(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &OutboxConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(1))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    let count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        let delivery = sender.send(&message);
        let attempt = u32::try_from(attempts).unwrap_or(0).saturating_add(1);
        record_delivery(&mut tx, id, attempt, delivery, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;
    Ok(count)
}

// Rows that leave `pending` drop the code from their payload.
const MARK_SENT: &str = r"
    UPDATE email_outbox
    SET status = 'sent', attempts = $2, last_error = $3, sent_at = NOW(),
        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond'),
        payload_json = payload_json - 'code'
    WHERE id = $1
";

const MARK_FAILED: &str = r"
    UPDATE email_outbox
    SET status = 'failed', attempts = $2, last_error = $3,
        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond'),
        payload_json = payload_json - 'code'
    WHERE id = $1
";

const RESCHEDULE: &str = r"
    UPDATE email_outbox
    SET status = 'pending', attempts = $2, last_error = $3,
        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
    WHERE id = $1
";

async fn record_delivery(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempt: u32,
    delivery: Result<()>,
    config: &OutboxConfig,
) -> Result<()> {
    let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);

    let (query, last_error, delay) = match delivery {
        Ok(()) => (MARK_SENT, None, Duration::ZERO),
        Err(err) if attempt >= config.max_attempts() => {
            (MARK_FAILED, Some(format!("{err:#}")), Duration::ZERO)
        }
        Err(err) => (
            RESCHEDULE,
            Some(format!("{err:#}")),
            backoff_delay(attempt, config.backoff_base, config.backoff_max),
        ),
    };

    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(attempt_i32)
        .bind(last_error)
        .bind(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update email outbox row")?;
    Ok(())
}

/// Exponential backoff capped at `max`, with the upper half jittered.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let capped = base.checked_mul(1u32 << exponent).unwrap_or(max).min(max);

    let millis = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
    if millis < 2 {
        return capped;
    }
    let half = millis / 2;
    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
}
