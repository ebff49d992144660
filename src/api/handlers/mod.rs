//! Route handlers. Each takes the shared [`OtpService`](crate::otp::OtpService)
//! as an `Extension` and maps domain results to status codes.

pub mod health;
pub mod otp;
pub mod password;
