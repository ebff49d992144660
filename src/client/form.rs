//! Form state for requesting and entering a code.
//!
//! [`OtpForm`] is a plain value owned by the caller. Each submission is split
//! into `begin_*` (validate, mark in flight, produce the payload for
//! [`OtpClient`](super::OtpClient)) and `finish_*` (clear the flag, record the
//! message). While a submission is in flight the form refuses another one.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ClientError;
use crate::api::types::{OtpRequestAccepted, VerifyResponse};
use crate::otp::Purpose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("a request is already in flight")]
    Busy,
    #[error("enter an item id or email first")]
    MissingSubject,
    #[error("enter the code from the email first")]
    MissingCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSubmission {
    pub subject_id: String,
    pub purpose: Purpose,
}

#[derive(Clone)]
pub struct VerifySubmission {
    pub subject_id: String,
    pub code: SecretString,
}

impl fmt::Debug for VerifySubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifySubmission")
            .field("subject_id", &self.subject_id)
            .field("code", &"***")
            .finish()
    }
}

#[derive(Debug)]
pub struct OtpForm {
    subject_id: String,
    purpose: Purpose,
    code: SecretString,
    loading: bool,
    message: Option<String>,
}

impl OtpForm {
    #[must_use]
    pub fn new(subject_id: &str, purpose: Purpose) -> Self {
        Self {
            subject_id: subject_id.trim().to_string(),
            purpose,
            code: SecretString::from(String::new()),
            loading: false,
            message: None,
        }
    }

    pub fn set_code(&mut self, code: &str) {
        self.code = SecretString::from(code.trim().to_string());
    }

    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    #[must_use]
    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    #[must_use]
    pub fn has_code(&self) -> bool {
        !self.code.expose_secret().is_empty()
    }

    /// Whether the submit button should be disabled.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Start a code request.
    ///
    /// # Errors
    /// `Busy` while another submission is in flight, `MissingSubject` when no
    /// subject was entered.
    pub fn begin_request(&mut self) -> Result<RequestSubmission, FormError> {
        if self.loading {
            return Err(FormError::Busy);
        }
        if self.subject_id.is_empty() {
            return Err(FormError::MissingSubject);
        }

        self.loading = true;
        self.message = None;
        Ok(RequestSubmission {
            subject_id: self.subject_id.clone(),
            purpose: self.purpose,
        })
    }

    pub fn finish_request(&mut self, result: &Result<OtpRequestAccepted, ClientError>) {
        self.loading = false;
        self.message = Some(match result {
            Ok(accepted) => code_sent_message(self.purpose, accepted.expires_in_seconds),
            Err(err) => err.user_message(),
        });
    }

    /// Start a verification with the entered code.
    ///
    /// # Errors
    /// `Busy`, `MissingSubject`, or `MissingCode`.
    pub fn begin_verify(&mut self) -> Result<VerifySubmission, FormError> {
        if self.loading {
            return Err(FormError::Busy);
        }
        if self.subject_id.is_empty() {
            return Err(FormError::MissingSubject);
        }
        if !self.has_code() {
            return Err(FormError::MissingCode);
        }

        self.loading = true;
        self.message = None;
        Ok(VerifySubmission {
            subject_id: self.subject_id.clone(),
            code: self.code.clone(),
        })
    }

    /// Record a verification result and return the reset token, if any.
    ///
    /// The entered code is kept only after a network failure so the same
    /// form can be submitted again.
    pub fn finish_verify(
        &mut self,
        result: Result<VerifyResponse, ClientError>,
    ) -> Option<SecretString> {
        self.loading = false;

        let keep_code = matches!(&result, Err(err) if err.is_retryable());
        if !keep_code {
            self.code = SecretString::from(String::new());
        }

        match result {
            Ok(verified) => {
                self.message = Some(verified_message(self.purpose).to_string());
                verified.reset_token.map(SecretString::from)
            }
            Err(err) => {
                self.message = Some(err.user_message());
                None
            }
        }
    }
}

fn code_sent_message(purpose: Purpose, expires_in_seconds: u64) -> String {
    let minutes = expires_in_seconds.div_ceil(60).max(1);
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    match purpose {
        Purpose::ClaimReturn => {
            format!("A code was sent to the claimant. It expires in {minutes} {unit}.")
        }
        Purpose::PasswordReset => {
            format!("A code was sent to your email. It expires in {minutes} {unit}.")
        }
    }
}

fn verified_message(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::ClaimReturn => "Code confirmed. The item is marked as returned.",
        Purpose::PasswordReset => "Code confirmed. You can now choose a new password.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::VerifyResult;

    fn verified(reset_token: Option<&str>) -> VerifyResponse {
        VerifyResponse {
            result: VerifyResult::Success,
            attempts_remaining: None,
            reset_token: reset_token.map(str::to_string),
        }
    }

    #[test]
    fn request_in_flight_blocks_resubmission() {
        let mut form = OtpForm::new("owner@campus.edu", Purpose::PasswordReset);
        let submission = form.begin_request();
        assert!(submission.is_ok());
        assert!(form.is_loading());
        assert_eq!(form.begin_request(), Err(FormError::Busy));
        assert!(matches!(form.begin_verify(), Err(FormError::Busy)));

        form.finish_request(&Ok(OtpRequestAccepted {
            expires_in_seconds: 300,
        }));
        assert!(!form.is_loading());
        assert_eq!(
            form.message(),
            Some("A code was sent to your email. It expires in 5 minutes.")
        );
    }

    #[test]
    fn missing_inputs_are_reported_without_loading() {
        let mut form = OtpForm::new("  ", Purpose::ClaimReturn);
        assert_eq!(form.begin_request(), Err(FormError::MissingSubject));
        assert!(!form.is_loading());

        let mut form = OtpForm::new("5d1c2a64-0e7b-4f44-9d4f-2b7e3f9a8c10", Purpose::ClaimReturn);
        assert!(matches!(form.begin_verify(), Err(FormError::MissingCode)));
        form.set_code("   ");
        assert!(matches!(form.begin_verify(), Err(FormError::MissingCode)));
        assert!(!form.is_loading());
    }

    #[test]
    fn wrong_code_clears_entry_and_shows_attempts() {
        let mut form = OtpForm::new("item", Purpose::ClaimReturn);
        form.set_code("000000");
        let submission = form.begin_verify();
        assert!(submission
            .as_ref()
            .is_ok_and(|s| s.code.expose_secret() == "000000"));

        let token = form.finish_verify(Err(ClientError::Invalid {
            attempts_remaining: Some(2),
        }));
        assert!(token.is_none());
        assert!(!form.has_code());
        assert!(!form.is_loading());
        assert_eq!(form.message(), Some("That code is not correct. 2 attempts left."));
    }

    #[test]
    fn network_failure_keeps_code_for_retry() {
        let mut form = OtpForm::new("item", Purpose::ClaimReturn);
        form.set_code("483920");
        let first = form.begin_verify().map(|s| s.code.expose_secret().to_string());

        form.finish_verify(Err(ClientError::NetworkFailure("timeout".to_string())));
        assert!(form.has_code());
        assert!(!form.is_loading());

        let second = form.begin_verify().map(|s| s.code.expose_secret().to_string());
        assert_eq!(first, second);
    }

    #[test]
    fn success_messages_depend_on_purpose() {
        let mut claim = OtpForm::new("item", Purpose::ClaimReturn);
        claim.set_code("483920");
        let _ = claim.begin_verify();
        assert!(claim.finish_verify(Ok(verified(None))).is_none());
        assert_eq!(
            claim.message(),
            Some("Code confirmed. The item is marked as returned.")
        );

        let mut reset = OtpForm::new("owner@campus.edu", Purpose::PasswordReset);
        reset.set_code("483920");
        let _ = reset.begin_verify();
        let token = reset.finish_verify(Ok(verified(Some("reset-token"))));
        assert_eq!(
            token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("reset-token".to_string())
        );
        assert!(!reset.has_code());
        assert_ne!(claim.message(), reset.message());
    }

    #[test]
    fn terminal_results_have_distinct_messages() {
        let mut messages = Vec::new();
        for err in [
            ClientError::Expired,
            ClientError::Exhausted,
            ClientError::Invalid {
                attempts_remaining: Some(1),
            },
            ClientError::NetworkFailure("reset".to_string()),
        ] {
            let mut form = OtpForm::new("item", Purpose::ClaimReturn);
            form.set_code("111111");
            let _ = form.begin_verify();
            form.finish_verify(Err(err));
            messages.push(form.message().map(str::to_string));
        }
        let before = messages.len();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), before);
    }

    #[test]
    fn short_ttl_rounds_up_to_a_minute() {
        assert_eq!(
            code_sent_message(Purpose::ClaimReturn, 30),
            "A code was sent to the claimant. It expires in 1 minute."
        );
    }

    #[test]
    fn verify_submission_debug_hides_code() {
        let submission = VerifySubmission {
            subject_id: "item".to_string(),
            code: SecretString::from("483920".to_string()),
        };
        assert!(!format!("{submission:?}").contains("483920"));
    }
}
