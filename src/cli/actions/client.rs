use crate::{
    client::{ClientError, OtpClient, OtpForm},
    otp::Purpose,
};
use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

#[derive(Debug)]
pub struct Connection {
    pub api_url: String,
    pub timeout_seconds: u64,
}

impl Connection {
    fn client(&self) -> Result<OtpClient> {
        OtpClient::new(&self.api_url, Duration::from_secs(self.timeout_seconds))
    }
}

#[derive(Debug)]
pub struct RequestArgs {
    pub connection: Connection,
    pub subject: String,
    pub purpose: Purpose,
}

#[derive(Debug)]
pub struct VerifyArgs {
    pub connection: Connection,
    pub subject: String,
    pub purpose: Purpose,
    pub code: SecretString,
}

#[derive(Debug)]
pub struct ResetPasswordArgs {
    pub connection: Connection,
    pub email: String,
    pub token: SecretString,
    pub new_password: SecretString,
}

/// Request a code and print the form message.
/// # Errors
/// Returns an error if the input is incomplete or the server refuses the request.
pub async fn request(args: RequestArgs) -> Result<()> {
    let client = args.connection.client()?;
    let mut form = OtpForm::new(&args.subject, args.purpose);

    let submission = form.begin_request()?;
    let result = client.request_challenge(&submission).await;
    form.finish_request(&result);

    print_message(&form);
    result.map(|_| ()).map_err(failure)
}

/// Verify a code and print the form message, plus the reset token if one was issued.
/// # Errors
/// Returns an error if the input is incomplete or the code is not accepted.
pub async fn verify(args: VerifyArgs) -> Result<()> {
    let client = args.connection.client()?;
    let mut form = OtpForm::new(&args.subject, args.purpose);
    form.set_code(args.code.expose_secret());

    let submission = form.begin_verify()?;
    let result = client.verify(&submission).await;
    let failed = result.as_ref().err().cloned();
    let reset_token = form.finish_verify(result);

    print_message(&form);
    if let Some(err) = failed {
        return Err(failure(err));
    }
    if let Some(token) = reset_token {
        println!("Reset token: {}", token.expose_secret());
    }
    Ok(())
}

/// Set a new password with a reset token.
/// # Errors
/// Returns an error if the password is rejected or the token is not valid.
pub async fn reset_password(args: ResetPasswordArgs) -> Result<()> {
    let client = args.connection.client()?;
    match client
        .reset_password(
            &args.email,
            args.token.expose_secret(),
            args.new_password.expose_secret(),
        )
        .await
    {
        Ok(()) => {
            println!("Password updated.");
            Ok(())
        }
        Err(err) => {
            println!("{}", err.user_message());
            Err(failure(err))
        }
    }
}

fn print_message(form: &OtpForm) {
    if let Some(message) = form.message() {
        println!("{message}");
    }
}

fn failure(err: ClientError) -> anyhow::Error {
    anyhow!(err)
}
