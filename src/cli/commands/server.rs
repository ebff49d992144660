use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

use crate::email::OutboxConfig;

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

pub const ARG_OUTBOX_POLL_SECONDS: &str = "email-outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH_SIZE: &str = "email-outbox-batch-size";
pub const ARG_OUTBOX_MAX_ATTEMPTS: &str = "email-outbox-max-attempts";
pub const ARG_OUTBOX_BACKOFF_BASE_SECONDS: &str = "email-outbox-backoff-base-seconds";
pub const ARG_OUTBOX_BACKOFF_MAX_SECONDS: &str = "email-outbox-backoff-max-seconds";

#[must_use]
pub fn command() -> Command {
    let command = Command::new("server")
        .about("Serve the code API")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("RECLAIM_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("RECLAIM_DSN")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed to call the API from a browser")
                .env("RECLAIM_FRONTEND_BASE_URL"),
        );

    let command = with_outbox_args(command);
    super::otp::with_args(command)
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OUTBOX_POLL_SECONDS)
                .long(ARG_OUTBOX_POLL_SECONDS)
                .help("Email outbox poll interval in seconds")
                .env("RECLAIM_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH_SIZE)
                .long(ARG_OUTBOX_BATCH_SIZE)
                .help("Email outbox batch size per poll")
                .env("RECLAIM_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_OUTBOX_MAX_ATTEMPTS)
                .help("Max attempts before marking an email as failed")
                .env("RECLAIM_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
                .long(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
                .help("Base delay for email outbox retry backoff")
                .env("RECLAIM_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
                .long(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
                .help("Max delay for email outbox retry backoff")
                .env("RECLAIM_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Build the outbox worker settings from parsed flags.
///
/// # Errors
/// Returns an error if a flag with a default value is missing.
pub fn outbox(matches: &ArgMatches) -> Result<OutboxConfig> {
    let poll = *matches
        .get_one::<u64>(ARG_OUTBOX_POLL_SECONDS)
        .context("missing --email-outbox-poll-seconds")?;
    let batch_size = *matches
        .get_one::<usize>(ARG_OUTBOX_BATCH_SIZE)
        .context("missing --email-outbox-batch-size")?;
    let max_attempts = *matches
        .get_one::<u32>(ARG_OUTBOX_MAX_ATTEMPTS)
        .context("missing --email-outbox-max-attempts")?;
    let backoff_base = *matches
        .get_one::<u64>(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
        .context("missing --email-outbox-backoff-base-seconds")?;
    let backoff_max = *matches
        .get_one::<u64>(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
        .context("missing --email-outbox-backoff-max-seconds")?;

    Ok(OutboxConfig::new()
        .with_poll_interval_seconds(poll)
        .with_batch_size(batch_size)
        .with_max_attempts(max_attempts)
        .with_backoff_base_seconds(backoff_base)
        .with_backoff_max_seconds(backoff_max))
}
