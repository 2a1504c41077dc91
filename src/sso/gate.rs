//! Second-factor decision and bookkeeping.
//!
//! ```text
//! decide ──► Bypassed                       (gate off, or ip trusted)
//!        └─► ChallengeIssued ──► Verified
//!                            └─► Failed     (blocks the identity)
//! ```

use crate::{
    challenge::{ChallengeVerifier, VerifierError, VERIFIED_BODY},
    provider::UserProfile,
    sso::store::{ForbiddenEntry, ForbiddenStore, TrustEntry, TrustIpStore},
};
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateConfig {
    enabled: bool,
    block_seconds: i64,
    trust_seconds: i64,
}

impl GateConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: false,
            block_seconds: 0,
            trust_seconds: 0,
        }
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// How long a failed challenge blocks the identity; 0 disables blocking.
    #[must_use]
    pub const fn with_block_seconds(mut self, seconds: i64) -> Self {
        self.block_seconds = seconds;
        self
    }

    /// How long a successful login trusts the client ip; 0 disables trust.
    #[must_use]
    pub const fn with_trust_seconds(mut self, seconds: i64) -> Self {
        self.trust_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn block_seconds(&self) -> i64 {
        self.block_seconds
    }

    #[must_use]
    pub const fn trust_seconds(&self) -> i64 {
        self.trust_seconds
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateState {
    Bypassed,
    ChallengeIssued,
    Verified,
    Failed { reason: String },
}

impl GateState {
    /// Whether a session may be granted in this state.
    #[must_use]
    pub const fn grants(&self) -> bool {
        matches!(self, Self::Bypassed | Self::Verified)
    }
}

pub struct TwoFactorGate {
    config: GateConfig,
    trust: Arc<TrustIpStore>,
    forbidden: Arc<ForbiddenStore>,
    verifier: Option<Arc<dyn ChallengeVerifier>>,
}

impl std::fmt::Debug for TwoFactorGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoFactorGate")
            .field("config", &self.config)
            .field("verifier", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

impl TwoFactorGate {
    /// # Errors
    /// Returns an error if the gate is enabled without a verifier.
    pub fn new(
        config: GateConfig,
        trust: Arc<TrustIpStore>,
        forbidden: Arc<ForbiddenStore>,
        verifier: Option<Arc<dyn ChallengeVerifier>>,
    ) -> Result<Self> {
        if config.enabled() && verifier.is_none() {
            bail!("two-factor authentication is on but no verifier is configured");
        }
        Ok(Self {
            config,
            trust,
            forbidden,
            verifier,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Live block for an ip or identity key.
    #[must_use]
    pub fn blocked(&self, key: &str, now: i64) -> Option<ForbiddenEntry> {
        self.forbidden.blocked(key, now)
    }

    #[must_use]
    pub fn decide(&self, ip: &str, now: i64) -> GateState {
        if !self.config.enabled() || self.trust.is_trusted(ip, now) {
            GateState::Bypassed
        } else {
            GateState::ChallengeIssued
        }
    }

    /// Render the challenge form for `profile`.
    ///
    /// # Errors
    /// Returns `Unavailable` if the verifier cannot be reached.
    pub async fn present(&self, profile: &UserProfile) -> Result<String, VerifierError> {
        self.verifier()?.present(profile).await
    }

    /// Check the end user's answers; a rejection blocks the identity.
    ///
    /// # Errors
    /// Returns `Unavailable` if the verifier cannot be reached. Nothing is blocked then.
    pub async fn submit(
        &self,
        profile: &UserProfile,
        fields: &[(String, String)],
        now: i64,
    ) -> Result<GateState, VerifierError> {
        let verdict = self.verifier()?.submit(profile, fields).await?;

        if verdict == VERIFIED_BODY {
            info!(user_id = %profile.user_id, "second factor verified");
            return Ok(GateState::Verified);
        }

        warn!(user_id = %profile.user_id, reason = %verdict, "second factor rejected");
        if self.config.block_seconds() > 0 {
            self.forbidden.block(
                profile.block_key(),
                ForbiddenEntry {
                    name: profile.name.clone(),
                    contact_type: profile.contact_type,
                    mobile: profile.mobile.clone(),
                    expires_at: now.saturating_add(self.config.block_seconds()),
                },
            );
        }

        Ok(GateState::Failed { reason: verdict })
    }

    /// Count a granted session towards trusting `ip`.
    pub fn record_login(&self, ip: &str, now: i64) -> Option<TrustEntry> {
        (self.config.trust_seconds() > 0)
            .then(|| self.trust.increment(ip, now, self.config.trust_seconds()))
    }

    fn verifier(&self) -> Result<&dyn ChallengeVerifier, VerifierError> {
        self.verifier
            .as_deref()
            .ok_or_else(|| VerifierError::Unavailable {
                detail: "no verifier configured".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::VerifierFuture;
    use crate::provider::ContactType;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    struct ScriptedVerifier {
        verdict: Result<String, VerifierError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedVerifier {
        fn new(verdict: Result<&str, VerifierError>) -> Arc<Self> {
            Arc::new(Self {
                verdict: verdict.map(ToString::to_string),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl ChallengeVerifier for ScriptedVerifier {
        fn present<'a>(&'a self, _profile: &'a UserProfile) -> VerifierFuture<'a> {
            Box::pin(async move {
                if let Ok(mut calls) = self.calls.lock() {
                    calls.push("present".to_string());
                }
                self.verdict.clone().map(|_| "<form/>".to_string())
            })
        }

        fn submit<'a>(
            &'a self,
            _profile: &'a UserProfile,
            _fields: &'a [(String, String)],
        ) -> VerifierFuture<'a> {
            Box::pin(async move {
                if let Ok(mut calls) = self.calls.lock() {
                    calls.push("submit".to_string());
                }
                self.verdict.clone()
            })
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            name: "Ada".to_string(),
            contact_type: ContactType::Internal,
            mobile: "13800000000".to_string(),
            user_id: "user-1".to_string(),
            open_id: "open-1".to_string(),
            ..UserProfile::default()
        }
    }

    fn build_gate(
        config: GateConfig,
        verifier: Option<Arc<dyn ChallengeVerifier>>,
    ) -> (TwoFactorGate, Arc<TrustIpStore>, Arc<ForbiddenStore>) {
        let trust = Arc::new(TrustIpStore::new());
        let forbidden = Arc::new(ForbiddenStore::new());
        let gate = TwoFactorGate::new(config, trust.clone(), forbidden.clone(), verifier);
        let Ok(gate) = gate else {
            panic!("gate should build");
        };
        (gate, trust, forbidden)
    }

    fn enabled() -> GateConfig {
        GateConfig::new()
            .with_enabled(true)
            .with_block_seconds(3600)
            .with_trust_seconds(86400)
    }

    #[test]
    fn enabled_gate_requires_verifier() {
        let result = TwoFactorGate::new(
            enabled(),
            Arc::new(TrustIpStore::new()),
            Arc::new(ForbiddenStore::new()),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn disabled_gate_bypasses() {
        let (gate, _, _) = build_gate(GateConfig::new(), None);
        assert_eq!(gate.decide("1.2.3.4", NOW), GateState::Bypassed);
        assert!(GateState::Bypassed.grants());
    }

    #[test]
    fn trusted_ip_bypasses_until_trust_lapses() {
        let (gate, trust, _) = build_gate(enabled(), Some(ScriptedVerifier::new(Ok("success"))));
        assert_eq!(gate.decide("1.2.3.4", NOW), GateState::ChallengeIssued);
        assert!(!GateState::ChallengeIssued.grants());

        trust.increment("1.2.3.4", NOW, 60);
        assert_eq!(gate.decide("1.2.3.4", NOW + 59), GateState::Bypassed);
        assert_eq!(gate.decide("1.2.3.4", NOW + 60), GateState::ChallengeIssued);
    }

    #[tokio::test]
    async fn success_verifies_without_block() {
        let verifier = ScriptedVerifier::new(Ok("success"));
        let (gate, _, forbidden) = build_gate(enabled(), Some(verifier.clone()));

        assert_eq!(gate.present(&profile()).await, Ok("<form/>".to_string()));
        let state = gate.submit(&profile(), &[], NOW).await;
        assert_eq!(state, Ok(GateState::Verified));
        assert!(forbidden.is_empty());
        assert_eq!(verifier.calls(), vec!["present", "submit"]);
    }

    #[tokio::test]
    async fn rejection_blocks_identity() {
        let (gate, _, forbidden) = build_gate(enabled(), Some(ScriptedVerifier::new(Ok("wrong code"))));

        let state = gate.submit(&profile(), &[], NOW).await;
        assert_eq!(
            state,
            Ok(GateState::Failed {
                reason: "wrong code".to_string()
            })
        );

        let entry = gate.blocked("open-1", NOW + 1);
        assert_eq!(
            entry,
            Some(ForbiddenEntry {
                name: "Ada".to_string(),
                contact_type: ContactType::Internal,
                mobile: "13800000000".to_string(),
                expires_at: NOW + 3600,
            })
        );
        assert!(gate.blocked("open-1", NOW + 3600).is_none());
        assert!(forbidden.is_empty());
    }

    #[tokio::test]
    async fn rejection_without_open_id_blocks_user_id() {
        let (gate, _, _) = build_gate(enabled(), Some(ScriptedVerifier::new(Ok("nope"))));
        let mut profile = profile();
        profile.open_id.clear();

        let _ = gate.submit(&profile, &[], NOW).await;
        assert!(gate.blocked("user-1", NOW).is_some());
    }

    #[tokio::test]
    async fn zero_block_duration_never_blocks() {
        let config = enabled().with_block_seconds(0);
        let (gate, _, forbidden) = build_gate(config, Some(ScriptedVerifier::new(Ok("nope"))));

        let state = gate.submit(&profile(), &[], NOW).await;
        assert!(matches!(state, Ok(GateState::Failed { .. })));
        assert!(forbidden.is_empty());
    }

    #[tokio::test]
    async fn unavailable_verifier_never_blocks() {
        let verifier = ScriptedVerifier::new(Err(VerifierError::Unavailable {
            detail: "down".to_string(),
        }));
        let (gate, _, forbidden) = build_gate(enabled(), Some(verifier));

        let state = gate.submit(&profile(), &[], NOW).await;
        assert!(matches!(state, Err(VerifierError::Unavailable { .. })));
        assert!(gate.present(&profile()).await.is_err());
        assert!(forbidden.is_empty());
    }

    #[test]
    fn record_login_respects_trust_duration() {
        let (gate, trust, _) = build_gate(GateConfig::new().with_trust_seconds(30), None);
        assert_eq!(
            gate.record_login("1.2.3.4", NOW),
            Some(TrustEntry {
                total_login_count: 1,
                expires_at: NOW + 30,
            })
        );
        assert_eq!(
            gate.record_login("1.2.3.4", NOW + 10).map(|e| e.total_login_count),
            Some(2)
        );
        assert_eq!(trust.len(), 1);

        let (gate, trust, _) = build_gate(GateConfig::new(), None);
        assert_eq!(gate.record_login("1.2.3.4", NOW), None);
        assert!(trust.is_empty());
    }
}
