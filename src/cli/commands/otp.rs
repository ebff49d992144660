//! Code policy flags shared by the `server` subcommand.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

use crate::otp::{policy::MAX_DURATION_SECONDS, OtpPolicy};

pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_OTP_CODE_LENGTH: &str = "otp-code-length";
pub const ARG_OTP_REQUEST_COOLDOWN_SECONDS: &str = "otp-request-cooldown-seconds";
pub const ARG_OTP_REQUEST_WINDOW_SECONDS: &str = "otp-request-window-seconds";
pub const ARG_OTP_MAX_REQUESTS_PER_WINDOW: &str = "otp-max-requests-per-window";
pub const ARG_RESET_GRANT_TTL_SECONDS: &str = "reset-grant-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("Seconds a code stays valid")
                .env("RECLAIM_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_DURATION_SECONDS)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Wrong guesses allowed per code")
                .env("RECLAIM_OTP_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_CODE_LENGTH)
                .long(ARG_OTP_CODE_LENGTH)
                .help("Digits per code (4-10)")
                .env("RECLAIM_OTP_CODE_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(u8).range(4..=10)),
        )
        .arg(
            Arg::new(ARG_OTP_REQUEST_COOLDOWN_SECONDS)
                .long(ARG_OTP_REQUEST_COOLDOWN_SECONDS)
                .help("Minimum seconds between two code requests for one subject")
                .env("RECLAIM_OTP_REQUEST_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(0..=MAX_DURATION_SECONDS)),
        )
        .arg(
            Arg::new(ARG_OTP_REQUEST_WINDOW_SECONDS)
                .long(ARG_OTP_REQUEST_WINDOW_SECONDS)
                .help("Length of the request counting window in seconds")
                .env("RECLAIM_OTP_REQUEST_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_DURATION_SECONDS)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_REQUESTS_PER_WINDOW)
                .long(ARG_OTP_MAX_REQUESTS_PER_WINDOW)
                .help("Code requests allowed per subject per window")
                .env("RECLAIM_OTP_MAX_REQUESTS_PER_WINDOW")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESET_GRANT_TTL_SECONDS)
                .long(ARG_RESET_GRANT_TTL_SECONDS)
                .help("Seconds a password reset token stays usable")
                .env("RECLAIM_RESET_GRANT_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_DURATION_SECONDS)),
        )
}

/// Build the policy from parsed flags.
///
/// # Errors
/// Returns an error if a flag with a default value is missing.
pub fn policy(matches: &ArgMatches) -> Result<OtpPolicy> {
    let ttl = *matches
        .get_one::<i64>(ARG_OTP_TTL_SECONDS)
        .context("missing --otp-ttl-seconds")?;
    let max_attempts = *matches
        .get_one::<u32>(ARG_OTP_MAX_ATTEMPTS)
        .context("missing --otp-max-attempts")?;
    let code_length = *matches
        .get_one::<u8>(ARG_OTP_CODE_LENGTH)
        .context("missing --otp-code-length")?;
    let cooldown = *matches
        .get_one::<i64>(ARG_OTP_REQUEST_COOLDOWN_SECONDS)
        .context("missing --otp-request-cooldown-seconds")?;
    let window = *matches
        .get_one::<i64>(ARG_OTP_REQUEST_WINDOW_SECONDS)
        .context("missing --otp-request-window-seconds")?;
    let max_requests = *matches
        .get_one::<u32>(ARG_OTP_MAX_REQUESTS_PER_WINDOW)
        .context("missing --otp-max-requests-per-window")?;
    let grant_ttl = *matches
        .get_one::<i64>(ARG_RESET_GRANT_TTL_SECONDS)
        .context("missing --reset-grant-ttl-seconds")?;

    Ok(OtpPolicy::new()
        .with_code_ttl_seconds(ttl)
        .with_max_attempts(max_attempts)
        .with_code_length(usize::from(code_length))
        .with_request_cooldown_seconds(cooldown)
        .with_request_window_seconds(window)
        .with_max_requests_per_window(max_requests)
        .with_reset_grant_ttl_seconds(grant_ttl))
}
