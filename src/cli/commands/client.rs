//! Subcommands that drive a running server over HTTP.

use clap::{builder::ValueParser, Arg, Command};

use crate::otp::Purpose;

pub const ARG_API_URL: &str = "api-url";
pub const ARG_TIMEOUT_SECONDS: &str = "timeout-seconds";
pub const ARG_SUBJECT: &str = "subject";
pub const ARG_PURPOSE: &str = "purpose";
pub const ARG_CODE: &str = "code";
pub const ARG_EMAIL: &str = "email";
pub const ARG_TOKEN: &str = "token";
pub const ARG_NEW_PASSWORD: &str = "new-password";

#[must_use]
pub fn validator_purpose() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<Purpose, String> {
        Purpose::parse(value)
            .ok_or_else(|| "expected claim-return or password-reset".to_string())
    })
}

fn with_connection_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_URL)
                .long(ARG_API_URL)
                .help("Base URL of the reclaim API")
                .env("RECLAIM_API_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_TIMEOUT_SECONDS)
                .long(ARG_TIMEOUT_SECONDS)
                .help("HTTP timeout in seconds")
                .env("RECLAIM_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_subject_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SUBJECT)
                .short('s')
                .long(ARG_SUBJECT)
                .help("Item id (claim-return) or account email (password-reset)")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PURPOSE)
                .long(ARG_PURPOSE)
                .help("claim-return or password-reset")
                .default_value("claim-return")
                .value_parser(validator_purpose()),
        )
}

#[must_use]
pub fn request_command() -> Command {
    let command = Command::new("request").about("Ask the server to email a code");
    with_connection_args(with_subject_args(command))
}

#[must_use]
pub fn verify_command() -> Command {
    let command = Command::new("verify")
        .about("Check a code read back by the claimant or account owner")
        .arg(
            Arg::new(ARG_CODE)
                .short('c')
                .long(ARG_CODE)
                .help("Code from the email")
                .required(true),
        );
    with_connection_args(with_subject_args(command))
}

#[must_use]
pub fn reset_password_command() -> Command {
    let command = Command::new("reset-password")
        .about("Set a new password with a reset token")
        .arg(
            Arg::new(ARG_EMAIL)
                .short('e')
                .long(ARG_EMAIL)
                .help("Account email")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN)
                .short('t')
                .long(ARG_TOKEN)
                .help("Reset token returned by a successful verify")
                .env("RECLAIM_RESET_TOKEN")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_NEW_PASSWORD)
                .long(ARG_NEW_PASSWORD)
                .help("New password")
                .env("RECLAIM_NEW_PASSWORD")
                .hide_env_values(true)
                .required(true),
        );
    with_connection_args(command)
}
