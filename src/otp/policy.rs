//! Configurable limits for code issuance and verification.

use chrono::{DateTime, Duration, Utc};

use super::{challenge::RequestWindow, OtpError};

const DEFAULT_CODE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_REQUEST_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_REQUEST_WINDOW_SECONDS: i64 = 60 * 60;
const DEFAULT_MAX_REQUESTS_PER_WINDOW: u32 = 3;
const DEFAULT_RESET_GRANT_TTL_SECONDS: i64 = 10 * 60;

/// Upper bound for every configurable duration: 30 days.
pub const MAX_DURATION_SECONDS: i64 = 30 * 24 * 60 * 60;

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    code_ttl_seconds: i64,
    max_attempts: u32,
    code_length: usize,
    request_cooldown_seconds: i64,
    request_window_seconds: i64,
    max_requests_per_window: u32,
    reset_grant_ttl_seconds: i64,
}

impl OtpPolicy {
    /// Defaults: 6-digit codes valid for 5 minutes with 3 attempts, one request
    /// per minute and at most 3 per hour, reset tokens valid for 10 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            code_length: DEFAULT_CODE_LENGTH,
            request_cooldown_seconds: DEFAULT_REQUEST_COOLDOWN_SECONDS,
            request_window_seconds: DEFAULT_REQUEST_WINDOW_SECONDS,
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            reset_grant_ttl_seconds: DEFAULT_RESET_GRANT_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    #[must_use]
    pub fn with_request_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.request_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_request_window_seconds(mut self, seconds: i64) -> Self {
        self.request_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_requests_per_window(mut self, requests: u32) -> Self {
        self.max_requests_per_window = requests;
        self
    }

    #[must_use]
    pub fn with_reset_grant_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_grant_ttl_seconds = seconds;
        self
    }

    /// Clamp values that would break the challenge invariants.
    ///
    /// TTLs must be positive (`expires_at > issued_at`), at least one attempt
    /// and one request per window are allowed, code length stays within
    /// `MIN_CODE_LENGTH..=MAX_CODE_LENGTH`, and no duration exceeds
    /// `MAX_DURATION_SECONDS`.
    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            code_ttl_seconds: self.code_ttl_seconds.clamp(1, MAX_DURATION_SECONDS),
            max_attempts: self.max_attempts.max(1),
            code_length: self.code_length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            request_cooldown_seconds: self.request_cooldown_seconds.clamp(0, MAX_DURATION_SECONDS),
            request_window_seconds: self.request_window_seconds.clamp(1, MAX_DURATION_SECONDS),
            max_requests_per_window: self.max_requests_per_window.max(1),
            reset_grant_ttl_seconds: self.reset_grant_ttl_seconds.clamp(1, MAX_DURATION_SECONDS),
        }
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        Duration::seconds(self.code_ttl_seconds)
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn request_cooldown_seconds(&self) -> i64 {
        self.request_cooldown_seconds
    }

    #[must_use]
    pub fn request_window_seconds(&self) -> i64 {
        self.request_window_seconds
    }

    #[must_use]
    pub fn max_requests_per_window(&self) -> u32 {
        self.max_requests_per_window
    }

    #[must_use]
    pub fn reset_grant_ttl(&self) -> Duration {
        Duration::seconds(self.reset_grant_ttl_seconds)
    }

    /// Decide whether a subject may receive a new code at `now`.
    ///
    /// `previous` is the request bookkeeping of the challenge being replaced.
    /// Returns the bookkeeping to store with the new challenge.
    ///
    /// # Errors
    /// Returns `OtpError::RateLimited` while the cooldown is running or once
    /// the window's request budget is spent.
    pub fn admit_request(
        &self,
        previous: Option<&RequestWindow>,
        now: DateTime<Utc>,
    ) -> Result<RequestWindow, OtpError> {
        let Some(previous) = previous else {
            return Ok(RequestWindow::starting_at(now));
        };

        let cooldown_ends =
            previous.last_requested_at + Duration::seconds(self.request_cooldown_seconds);
        if now < cooldown_ends {
            return Err(OtpError::RateLimited {
                retry_after_seconds: seconds_until(now, cooldown_ends),
            });
        }

        let window_ends = previous.started_at + Duration::seconds(self.request_window_seconds);
        if now >= window_ends {
            return Ok(RequestWindow::starting_at(now));
        }

        if previous.count >= self.max_requests_per_window {
            return Err(OtpError::RateLimited {
                retry_after_seconds: seconds_until(now, window_ends),
            });
        }

        Ok(RequestWindow {
            count: previous.count.saturating_add(1),
            started_at: previous.started_at,
            last_requested_at: now,
        })
    }
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds from `now` until `then`, rounded up, at least 1.
fn seconds_until(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    let millis = (then - now).num_milliseconds().max(0);
    let seconds = (millis + 999) / 1000;
    u64::try_from(seconds).unwrap_or(0).max(1)
}
