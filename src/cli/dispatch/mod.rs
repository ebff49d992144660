//! Map parsed subcommands to actions.

use crate::cli::{
    actions::{client, server, Action},
    commands::{client as client_args, otp, server as server_args},
};
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or no subcommand was given.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let sub_m = |subcommand| -> Result<&ArgMatches> {
        matches
            .subcommand_matches(subcommand)
            .context("arguments missing")
    };

    match matches.subcommand_name() {
        Some("server") => server_action(sub_m("server")?),
        Some("request") => {
            let m = sub_m("request")?;
            Ok(Action::Request(client::RequestArgs {
                connection: connection(m)?,
                subject: required_string(m, client_args::ARG_SUBJECT)?,
                purpose: purpose(m)?,
            }))
        }
        Some("verify") => {
            let m = sub_m("verify")?;
            Ok(Action::Verify(client::VerifyArgs {
                connection: connection(m)?,
                subject: required_string(m, client_args::ARG_SUBJECT)?,
                purpose: purpose(m)?,
                code: SecretString::from(required_string(m, client_args::ARG_CODE)?),
            }))
        }
        Some("reset-password") => {
            let m = sub_m("reset-password")?;
            Ok(Action::ResetPassword(client::ResetPasswordArgs {
                connection: connection(m)?,
                email: required_string(m, client_args::ARG_EMAIL)?,
                token: SecretString::from(required_string(m, client_args::ARG_TOKEN)?),
                new_password: SecretString::from(required_string(
                    m,
                    client_args::ARG_NEW_PASSWORD,
                )?),
            }))
        }
        Some(other) => Err(anyhow!("unknown subcommand: {other}")),
        None => Err(anyhow!("no subcommand given")),
    }
}

fn server_action(matches: &ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(server_args::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = required_string(matches, server_args::ARG_DSN)?;

    Ok(Action::Server(server::Args {
        port,
        dsn: SecretString::from(dsn),
        frontend_base_url: matches
            .get_one::<String>(server_args::ARG_FRONTEND_BASE_URL)
            .cloned(),
        policy: otp::policy(matches)?,
        outbox: server_args::outbox(matches)?,
    }))
}

fn connection(matches: &ArgMatches) -> Result<client::Connection> {
    Ok(client::Connection {
        api_url: required_string(matches, client_args::ARG_API_URL)?,
        timeout_seconds: matches
            .get_one::<u64>(client_args::ARG_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(10),
    })
}

fn purpose(matches: &ArgMatches) -> Result<crate::otp::Purpose> {
    matches
        .get_one::<crate::otp::Purpose>(client_args::ARG_PURPOSE)
        .copied()
        .context("missing required argument: --purpose")
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}
