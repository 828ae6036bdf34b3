//! # Cassa (payment back-office console)
//!
//! `cassa` is the operator-facing console for a payment-processing
//! platform's administrative back office. The back office itself (merchant
//! onboarding, channel and routing configuration, risk rules, settlement)
//! lives in a remote service; this crate signs an operator in against that
//! service and opens the permitted menu.
//!
//! ## Sign-in handshake
//!
//! Signing in is a multi-step protocol, not a single request:
//!
//! 1. The operator submits account, password, and the text of a one-time
//!    CAPTCHA challenge.
//! 2. The server answers with a status code: signed in, "no authenticator
//!    bound" (enroll a new TOTP secret), or "authenticator bound" (a
//!    6-digit code is required).
//! 3. The bind branch provisions a secret, renders it as a QR code, and
//!    registers the first code; the verify branch collects a code only.
//! 4. Either branch replays the original login with the code attached.
//! 5. On success the session is persisted and the permission set is
//!    fetched, falling back to a minimal safe set if that fetch fails.
//!
//! The handshake is modeled as an explicit state machine in [`auth`]; the
//! HTTP contract lives in [`api`]; the terminal front-end in [`console`]
//! and [`cli`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod console;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
