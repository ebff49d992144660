use crate::{
    api::{self, ServerConfig},
    email::OutboxConfig,
    otp::OtpPolicy,
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub frontend_base_url: Option<String>,
    pub policy: OtpPolicy,
    pub outbox: OutboxConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the DSN is not a `PostgreSQL` URL or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    check_dsn(&args.dsn)?;

    debug!(
        port = args.port,
        code_ttl_seconds = args.policy.code_ttl_seconds(),
        max_attempts = args.policy.max_attempts(),
        "starting server"
    );

    api::new(ServerConfig {
        port: args.port,
        dsn: args.dsn,
        frontend_base_url: args.frontend_base_url,
        policy: args.policy,
        outbox: args.outbox,
    })
    .await
}

fn check_dsn(dsn: &SecretString) -> Result<()> {
    // Never echo the DSN, it may carry a password.
    let parsed = Url::parse(dsn.expose_secret()).context("Invalid database connection string")?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(()),
        other => Err(anyhow!("Unsupported database scheme: {other}")),
    }
}
