pub mod client;
pub mod logging;
pub mod otp;
pub mod server;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("reclaim")
        .about("Claim verification and password recovery codes")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(server::command())
        .subcommand(client::request_command())
        .subcommand(client::verify_command())
        .subcommand(client::reset_password_command());

    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::Purpose;

    const DSN: &str = "postgres://reclaim@localhost:5432/reclaim";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "reclaim");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Claim verification and password recovery codes".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
        let names: Vec<&str> = command.get_subcommands().map(Command::get_name).collect();
        assert_eq!(names, ["server", "request", "verify", "reset-password"]);
    }

    #[test]
    fn test_server_port_and_dsn() {
        temp_env::with_vars(
            [
                ("RECLAIM_OTP_TTL_SECONDS", None::<&str>),
                ("RECLAIM_OTP_MAX_ATTEMPTS", None),
            ],
            || {
                let matches = new().get_matches_from(vec![
                    "reclaim", "server", "--port", "9090", "--dsn", DSN,
                ]);
                let Some(server) = matches.subcommand_matches("server") else {
                    panic!("server subcommand not matched");
                };

                assert_eq!(server.get_one::<u16>(server::ARG_PORT).copied(), Some(9090));
                assert_eq!(
                    server.get_one::<String>(server::ARG_DSN).cloned(),
                    Some(DSN.to_string())
                );
                assert_eq!(
                    server.get_one::<i64>(otp::ARG_OTP_TTL_SECONDS).copied(),
                    Some(300)
                );
                assert_eq!(
                    server.get_one::<u32>(otp::ARG_OTP_MAX_ATTEMPTS).copied(),
                    Some(3)
                );
            },
        );
    }

    #[test]
    fn test_server_requires_dsn() {
        temp_env::with_vars([("RECLAIM_DSN", None::<&str>)], || {
            let result = new().try_get_matches_from(vec!["reclaim", "server"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_subcommand_required() {
        let result = new().try_get_matches_from(vec!["reclaim"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("RECLAIM_PORT", Some("443")),
                ("RECLAIM_DSN", Some(DSN)),
                ("RECLAIM_FRONTEND_BASE_URL", Some("https://lostfound.campus.edu")),
                ("RECLAIM_OTP_TTL_SECONDS", Some("120")),
                ("RECLAIM_OTP_MAX_REQUESTS_PER_WINDOW", Some("5")),
                ("RECLAIM_EMAIL_OUTBOX_BATCH_SIZE", Some("25")),
                ("RECLAIM_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["reclaim", "server"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );

                let Some(server) = matches.subcommand_matches("server") else {
                    panic!("server subcommand not matched");
                };
                assert_eq!(server.get_one::<u16>(server::ARG_PORT).copied(), Some(443));
                assert_eq!(
                    server.get_one::<String>(server::ARG_FRONTEND_BASE_URL).cloned(),
                    Some("https://lostfound.campus.edu".to_string())
                );
                assert_eq!(
                    server.get_one::<i64>(otp::ARG_OTP_TTL_SECONDS).copied(),
                    Some(120)
                );
                assert_eq!(
                    server
                        .get_one::<u32>(otp::ARG_OTP_MAX_REQUESTS_PER_WINDOW)
                        .copied(),
                    Some(5)
                );
                assert_eq!(
                    server.get_one::<usize>(server::ARG_OUTBOX_BATCH_SIZE).copied(),
                    Some(25)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("RECLAIM_LOG_LEVEL", Some(level)),
                    ("RECLAIM_DSN", Some(DSN)),
                ],
                || {
                    let matches = new().get_matches_from(vec!["reclaim", "server"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_code_length_bounds() {
        let result = new().try_get_matches_from(vec![
            "reclaim",
            "server",
            "--dsn",
            DSN,
            "--otp-code-length",
            "3",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duration_upper_bounds() {
        for flag in [
            "--otp-ttl-seconds",
            "--otp-request-cooldown-seconds",
            "--otp-request-window-seconds",
            "--reset-grant-ttl-seconds",
        ] {
            let result = new().try_get_matches_from(vec![
                "reclaim",
                "server",
                "--dsn",
                DSN,
                flag,
                "10000000000000",
            ]);
            assert!(result.is_err(), "{flag} accepted an oversized value");
        }

        let max = crate::otp::policy::MAX_DURATION_SECONDS.to_string();
        let result = new().try_get_matches_from(vec![
            "reclaim",
            "server",
            "--dsn",
            DSN,
            "--otp-ttl-seconds",
            &max,
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_args() {
        let matches = new().get_matches_from(vec![
            "reclaim",
            "verify",
            "--subject",
            "owner@campus.edu",
            "--purpose",
            "password-reset",
            "--code",
            "483920",
            "--api-url",
            "http://127.0.0.1:9000",
        ]);
        let Some(verify) = matches.subcommand_matches("verify") else {
            panic!("verify subcommand not matched");
        };
        assert_eq!(
            verify.get_one::<Purpose>(client::ARG_PURPOSE).copied(),
            Some(Purpose::PasswordReset)
        );
        assert_eq!(
            verify.get_one::<String>(client::ARG_CODE).cloned(),
            Some("483920".to_string())
        );
        assert_eq!(
            verify.get_one::<u64>(client::ARG_TIMEOUT_SECONDS).copied(),
            Some(10)
        );
    }

    #[test]
    fn test_request_rejects_unknown_purpose() {
        let result = new().try_get_matches_from(vec![
            "reclaim",
            "request",
            "--subject",
            "item",
            "--purpose",
            "unlock-locker",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_password_reads_secrets_from_env() {
        temp_env::with_vars(
            [
                ("RECLAIM_RESET_TOKEN", Some("token-from-env")),
                ("RECLAIM_NEW_PASSWORD", Some("correct horse battery")),
            ],
            || {
                let matches = new().get_matches_from(vec![
                    "reclaim",
                    "reset-password",
                    "--email",
                    "owner@campus.edu",
                ]);
                let Some(reset) = matches.subcommand_matches("reset-password") else {
                    panic!("reset-password subcommand not matched");
                };
                assert_eq!(
                    reset.get_one::<String>(client::ARG_TOKEN).cloned(),
                    Some("token-from-env".to_string())
                );
                assert_eq!(
                    reset.get_one::<String>(client::ARG_NEW_PASSWORD).cloned(),
                    Some("correct horse battery".to_string())
                );
            },
        );
    }
}
