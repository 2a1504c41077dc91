//! Self-describing signed tickets.
//!
//! A ticket is the concatenation of four fixed-width fields, no separators:
//!
//! | field     | width | content                                   |
//! |-----------|-------|-------------------------------------------|
//! | timestamp | 13    | unix epoch milliseconds at mint time      |
//! | counter   | 4     | [`Counter`] value                         |
//! | mac       | 64    | lowercase hex `HMAC-SHA256`               |
//! | ttl       | 5     | session ttl in seconds + [`TTL_OFFSET`]   |
//!
//! The mac covers `"{timestamp} {counter} {user_agent} {client_ip} {ttl}"`, so a
//! ticket only verifies for the client fingerprint it was minted for. Nothing is
//! stored server side until the provider callback succeeds.

use hmac::{Hmac, Mac};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;

use super::clock::Clock;
use super::counter::Counter;

type HmacSha256 = Hmac<Sha256>;

pub const TICKET_LEN: usize = 86;
pub const TTL_OFFSET: i64 = 10_000;
/// Largest ttl that still encodes into five digits.
pub const MAX_TICKET_TTL: u32 = 89_999;
/// How long a minted ticket may wait for the QR code to be scanned.
pub const SCAN_GRACE_SECONDS: i64 = 100;

const TIMESTAMP_END: usize = 13;
const COUNTER_END: usize = TIMESTAMP_END + 4;
const MAC_END: usize = COUNTER_END + 64;

/// The (user agent, client ip) pair a ticket is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint<'a> {
    pub user_agent: &'a str,
    pub client_ip: &'a str,
}

impl<'a> Fingerprint<'a> {
    #[must_use]
    pub const fn new(user_agent: &'a str, client_ip: &'a str) -> Self {
        Self {
            user_agent,
            client_ip,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    /// Provider callback leg, bounded by [`SCAN_GRACE_SECONDS`].
    Scan,
    /// Backend redemption leg, bounded by the session ttl instead.
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("malformed ticket")]
    Malformed,
    #[error("scan window elapsed")]
    ScanWindowElapsed,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("ttl {0} cannot be encoded")]
    TtlOutOfRange(u32),
    #[error("invalid signing key")]
    SigningKey,
}

pub struct TicketCodec {
    secret: SecretString,
    counter: Counter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TicketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCodec")
            .field("secret", &"***")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl TicketCodec {
    #[must_use]
    pub fn new(secret: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            counter: Counter::new(),
            clock,
        }
    }

    /// Mint a ticket for `fingerprint` that will back a session of `ttl_seconds`.
    ///
    /// # Errors
    /// Returns [`TicketError::TtlOutOfRange`] when the ttl does not fit the wire format.
    pub fn mint(&self, fingerprint: Fingerprint<'_>, ttl_seconds: u32) -> Result<String, TicketError> {
        if ttl_seconds > MAX_TICKET_TTL {
            return Err(TicketError::TtlOutOfRange(ttl_seconds));
        }

        let timestamp = format!("{:013}", self.clock.now_millis());
        let counter = self.counter.next().to_string();
        let ttl_field = (i64::from(ttl_seconds) + TTL_OFFSET).to_string();
        let mac = self.sign(&timestamp, &counter, fingerprint, &ttl_field)?;

        Ok(format!("{timestamp}{counter}{}{ttl_field}", hex::encode(mac)))
    }

    /// Verify `ticket` against the caller's current fingerprint and return its ttl.
    ///
    /// # Errors
    /// Every failure is fatal for the ticket; the variant only says why, for logs.
    pub fn verify(
        &self,
        ticket: &str,
        fingerprint: Fingerprint<'_>,
        mode: VerifyMode,
    ) -> Result<u32, TicketError> {
        if !valid_layout(ticket) {
            return Err(TicketError::Malformed);
        }

        let timestamp = &ticket[..TIMESTAMP_END];
        let counter = &ticket[TIMESTAMP_END..COUNTER_END];
        let mac_hex = &ticket[COUNTER_END..MAC_END];
        let ttl_field = &ticket[MAC_END..];

        if mode == VerifyMode::Scan {
            let minted_ms: i64 = timestamp.parse().map_err(|_| TicketError::Malformed)?;
            let minted = minted_ms.div_euclid(1000);
            if minted + SCAN_GRACE_SECONDS < self.clock.now_unix() {
                return Err(TicketError::ScanWindowElapsed);
            }
        }

        let ttl: i64 = ttl_field.parse().map_err(|_| TicketError::Malformed)?;
        let ttl = u32::try_from(ttl - TTL_OFFSET).map_err(|_| TicketError::Malformed)?;

        let expected = hex::decode(mac_hex).map_err(|_| TicketError::Malformed)?;
        let mut mac = self.keyed_mac()?;
        mac.update(canonical(timestamp, counter, fingerprint, ttl_field).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| TicketError::SignatureMismatch)?;

        Ok(ttl)
    }

    fn sign(
        &self,
        timestamp: &str,
        counter: &str,
        fingerprint: Fingerprint<'_>,
        ttl_field: &str,
    ) -> Result<Vec<u8>, TicketError> {
        let mut mac = self.keyed_mac()?;
        mac.update(canonical(timestamp, counter, fingerprint, ttl_field).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn keyed_mac(&self) -> Result<HmacSha256, TicketError> {
        <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TicketError::SigningKey)
    }
}

fn canonical(timestamp: &str, counter: &str, fingerprint: Fingerprint<'_>, ttl_field: &str) -> String {
    format!(
        "{timestamp} {counter} {} {} {ttl_field}",
        fingerprint.user_agent, fingerprint.client_ip
    )
}

/// Length first, then charset: 17 digits, 64 lowercase hex, 5 digits.
fn valid_layout(ticket: &str) -> bool {
    ticket.len() == TICKET_LEN
        && Regex::new(r"^[0-9]{17}[0-9a-f]{64}[0-9]{5}$").is_ok_and(|re| re.is_match(ticket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::clock::ManualClock;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> (TicketCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        let codec = TicketCodec::new(SecretString::from("ticket-secret"), clock.clone());
        (codec, clock)
    }

    #[test]
    fn minted_ticket_has_fixed_layout() -> Result<(), TicketError> {
        let (codec, _) = codec();
        let ticket = codec.mint(Fingerprint::new("UA1", "IP1"), 30)?;

        assert_eq!(ticket.len(), TICKET_LEN);
        assert_eq!(&ticket[..13], "1700000000000");
        assert_eq!(&ticket[13..17], "1001");
        assert_eq!(&ticket[81..], "10030");
        assert!(valid_layout(&ticket));
        Ok(())
    }

    #[test]
    fn round_trip_returns_ttl() -> Result<(), TicketError> {
        let (codec, _) = codec();
        for ttl in [0, 1, 30, 300, 3600, MAX_TICKET_TTL] {
            let fingerprint = Fingerprint::new("Mozilla/5.0 (X11; Linux)", "10.1.2.3");
            let ticket = codec.mint(fingerprint, ttl)?;
            assert_eq!(codec.verify(&ticket, fingerprint, VerifyMode::Fetch), Ok(ttl));
            assert_eq!(codec.verify(&ticket, fingerprint, VerifyMode::Scan), Ok(ttl));
        }
        Ok(())
    }

    #[test]
    fn fingerprint_binding() -> Result<(), TicketError> {
        let (codec, _) = codec();
        let ticket = codec.mint(Fingerprint::new("UA1", "IP1"), 30)?;

        assert_eq!(
            codec.verify(&ticket, Fingerprint::new("UA1", "IP1"), VerifyMode::Fetch),
            Ok(30)
        );
        assert_eq!(
            codec.verify(&ticket, Fingerprint::new("UA2", "IP1"), VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );
        assert_eq!(
            codec.verify(&ticket, Fingerprint::new("UA1", "IP2"), VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );
        Ok(())
    }

    #[test]
    fn flipping_any_mac_character_fails() -> Result<(), TicketError> {
        let (codec, _) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");
        let ticket = codec.mint(fingerprint, 30)?;

        for index in COUNTER_END..MAC_END {
            let mut bytes = ticket.clone().into_bytes();
            bytes[index] = if bytes[index] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap_or_default();
            assert_eq!(
                codec.verify(&tampered, fingerprint, VerifyMode::Fetch),
                Err(TicketError::SignatureMismatch),
                "tampered position {index} verified"
            );
        }
        Ok(())
    }

    #[test]
    fn tampered_ttl_or_timestamp_fails() -> Result<(), TicketError> {
        let (codec, _) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");
        let ticket = codec.mint(fingerprint, 30)?;

        let longer_ttl = format!("{}19999", &ticket[..MAC_END]);
        assert_eq!(
            codec.verify(&longer_ttl, fingerprint, VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );

        let older = format!("1600000000000{}", &ticket[TIMESTAMP_END..]);
        assert_eq!(
            codec.verify(&older, fingerprint, VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );
        Ok(())
    }

    #[test]
    fn other_secret_fails() -> Result<(), TicketError> {
        let (codec, clock) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");
        let ticket = codec.mint(fingerprint, 30)?;

        let other = TicketCodec::new(SecretString::from("another-secret"), clock);
        assert_eq!(
            other.verify(&ticket, fingerprint, VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );
        Ok(())
    }

    #[test]
    fn scan_window_is_enforced_only_for_scans() -> Result<(), TicketError> {
        let (codec, clock) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");
        let ticket = codec.mint(fingerprint, 3600)?;

        clock.advance_secs(SCAN_GRACE_SECONDS);
        assert_eq!(codec.verify(&ticket, fingerprint, VerifyMode::Scan), Ok(3600));

        clock.advance_secs(1);
        assert_eq!(
            codec.verify(&ticket, fingerprint, VerifyMode::Scan),
            Err(TicketError::ScanWindowElapsed)
        );
        assert_eq!(codec.verify(&ticket, fingerprint, VerifyMode::Fetch), Ok(3600));
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() {
        let (codec, _) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");

        for candidate in [
            String::new(),
            "short".to_string(),
            "x".repeat(TICKET_LEN),
            "1".repeat(TICKET_LEN + 1),
            // uppercase hex is not part of the format
            format!("{}{}{}", "1".repeat(17), "A".repeat(64), "10030"),
            // multi-byte characters must not be sliced
            format!("{}é{}", "1".repeat(17), "a".repeat(67)),
        ] {
            assert_eq!(
                codec.verify(&candidate, fingerprint, VerifyMode::Fetch),
                Err(TicketError::Malformed),
                "{candidate:?} was not rejected as malformed"
            );
        }
    }

    #[test]
    fn verify_before_mint_fails_closed() {
        let (codec, _) = codec();
        let forged = format!("1700000000000{}{}10030", "1001", "0".repeat(64));
        assert_eq!(
            codec.verify(&forged, Fingerprint::new("UA1", "IP1"), VerifyMode::Fetch),
            Err(TicketError::SignatureMismatch)
        );
    }

    #[test]
    fn ttl_out_of_range_is_rejected() {
        let (codec, _) = codec();
        assert_eq!(
            codec.mint(Fingerprint::new("UA1", "IP1"), MAX_TICKET_TTL + 1),
            Err(TicketError::TtlOutOfRange(MAX_TICKET_TTL + 1))
        );
    }

    #[test]
    fn same_millisecond_tickets_differ() -> Result<(), TicketError> {
        let (codec, _) = codec();
        let fingerprint = Fingerprint::new("UA1", "IP1");
        let first = codec.mint(fingerprint, 30)?;
        let second = codec.mint(fingerprint, 30)?;
        assert_ne!(first, second);
        assert_eq!(first[..13], second[..13]);
        Ok(())
    }
}
