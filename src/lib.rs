//! # Reclaim (claim verification and password recovery codes)
//!
//! `reclaim` issues and verifies short one-time codes for a campus lost and
//! found service. Two flows share the same machinery:
//!
//! - **Claim return:** the person who posted a found item requests a code for
//!   an item in the `Claimed` state. The code is emailed to the claimant, who
//!   reads it back at hand-over. A correct code marks the item `Returned`.
//! - **Password reset:** a code is emailed to the account owner. A correct code
//!   yields a single-use reset token that allows one password change.
//!
//! ## Challenge lifecycle
//!
//! At most one live challenge exists per subject (item id or account email).
//! Requesting a new code replaces the previous one. A challenge ends when it
//! is verified, when its attempts run out, or when it expires. Codes are only
//! stored as digests and compared in constant time.
//!
//! Issue and verify are serialized per subject by the store (a transaction
//! scoped advisory lock plus a row lock on `PostgreSQL`), so two concurrent
//! verifications can never both succeed.
//!
//! ## Delivery
//!
//! Codes leave the service through a transactional email outbox: the outbox
//! row is written in the same transaction as the challenge and a background
//! worker delivers it.

pub mod api;
pub mod cli;
pub mod client;
pub mod email;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
