//! # qrsso (QR-scan single sign-on)
//!
//! `qrsso` lets a business site log users in by scanning a QR code with the
//! organization's messaging app.
//!
//! ## Flow
//!
//! 1. The browser opens `/scan`. A signed **ticket** bound to the browser's
//!    user agent and client ip is minted and the browser is redirected to the
//!    identity provider's QR page, carrying the ticket as the OAuth `state`.
//! 2. After the scan the provider redirects to `/scan/callback` with an
//!    authorization code. The ticket is checked, the code resolved into a user
//!    profile and, when the second factor gate asks for it, a challenge form is
//!    served and its answers verified.
//! 3. On success the profile is stored under the ticket for the ticket's ttl and
//!    posted back to the opener window.
//! 4. The business backend redeems the ticket on `/ticket` (or asks `/ttl`),
//!    forwarding the browser fingerprint so the ticket only works for the
//!    browser that scanned.
//!
//! ## State
//!
//! Sessions, trusted client ips and blocked identities live in memory only.
//! Entries expire lazily on read and are swept in the background; nothing
//! survives a restart.

pub mod api;
pub mod challenge;
pub mod cli;
pub mod provider;
pub mod sso;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
