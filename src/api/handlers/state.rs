//! Shared application state and its configuration.

use super::notify::NotifyConfig;
use crate::{
    challenge::ChallengeVerifier,
    provider::{dingtalk::DEFAULT_PROVIDER_URL, IdentityLookup},
    sso::{
        clock::Clock,
        gate::{GateConfig, TwoFactorGate},
        store::{ForbiddenStore, SessionStore, TrustIpStore},
        sweeper::{
            SweeperSet, FORBIDDEN_SWEEP_INTERVAL, SESSION_SWEEP_INTERVAL, TRUST_SWEEP_INTERVAL,
        },
        ticket::{TicketCodec, MAX_TICKET_TTL},
    },
};
use anyhow::{bail, Result};
use secrecy::SecretString;
use std::sync::Arc;

pub const DEFAULT_TICKET_TTL_SECONDS: u32 = 30;
pub const DEFAULT_TICKET_MAX_TTL_SECONDS: u32 = 3600;
pub const CALLBACK_PATH: &str = "/scan/callback";
/// Wildcard entry that makes every peer a trusted proxy.
pub const ANY_PROXY: &str = "0.0.0.0";

#[derive(Clone, Debug)]
pub struct SsoConfig {
    domain: String,
    ticket_max_ttl: u32,
    allow_ticket_renew: bool,
    trusted_proxies: Vec<String>,
    provider_url: String,
    provider_app_key: String,
    notify: NotifyConfig,
}

impl SsoConfig {
    /// `domain` is the public base URL the provider redirects back to.
    #[must_use]
    pub fn new(domain: String) -> Self {
        Self {
            domain: domain.trim_end_matches('/').to_string(),
            ticket_max_ttl: DEFAULT_TICKET_MAX_TTL_SECONDS,
            allow_ticket_renew: false,
            trusted_proxies: Vec::new(),
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            provider_app_key: String::new(),
            notify: NotifyConfig::default(),
        }
    }

    #[must_use]
    pub fn with_ticket_max_ttl(mut self, seconds: u32) -> Self {
        self.ticket_max_ttl = seconds;
        self
    }

    #[must_use]
    pub fn with_allow_ticket_renew(mut self, allow: bool) -> Self {
        self.allow_ticket_renew = allow;
        self
    }

    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: Vec<String>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, url: String, app_key: String) -> Self {
        self.provider_url = url.trim_end_matches('/').to_string();
        self.provider_app_key = app_key;
        self
    }

    #[must_use]
    pub fn with_notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub const fn ticket_max_ttl(&self) -> u32 {
        self.ticket_max_ttl
    }

    #[must_use]
    pub const fn allow_ticket_renew(&self) -> bool {
        self.allow_ticket_renew
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[String] {
        &self.trusted_proxies
    }

    #[must_use]
    pub fn provider_url(&self) -> &str {
        &self.provider_url
    }

    #[must_use]
    pub fn provider_app_key(&self) -> &str {
        &self.provider_app_key
    }

    #[must_use]
    pub const fn notify(&self) -> &NotifyConfig {
        &self.notify
    }

    /// Requested ttl if usable, otherwise the default.
    #[must_use]
    pub fn ticket_ttl(&self, requested: Option<&str>) -> u32 {
        requested
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|ttl| *ttl > 0 && *ttl <= i64::from(self.ticket_max_ttl))
            .and_then(|ttl| u32::try_from(ttl).ok())
            .unwrap_or(DEFAULT_TICKET_TTL_SECONDS)
    }

    /// # Errors
    /// Returns an error if the max ttl cannot be encoded into a ticket.
    pub fn validate(&self) -> Result<()> {
        if self.ticket_max_ttl > MAX_TICKET_TTL {
            bail!(
                "ticket max ttl {} exceeds {MAX_TICKET_TTL} seconds",
                self.ticket_max_ttl
            );
        }
        if self.domain.is_empty() {
            bail!("domain must not be empty");
        }
        Ok(())
    }
}

/// Everything a handler needs, shared behind one `Arc`.
pub struct AppState {
    config: SsoConfig,
    clock: Arc<dyn Clock>,
    codec: TicketCodec,
    sessions: Arc<SessionStore>,
    trust: Arc<TrustIpStore>,
    forbidden: Arc<ForbiddenStore>,
    gate: TwoFactorGate,
    identity: Arc<dyn IdentityLookup>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("codec", &self.codec)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// # Errors
    /// Returns an error if the configuration is invalid or the gate is enabled
    /// without a verifier.
    pub fn new(
        config: SsoConfig,
        ticket_secret: SecretString,
        gate_config: GateConfig,
        identity: Arc<dyn IdentityLookup>,
        verifier: Option<Arc<dyn ChallengeVerifier>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionStore::new());
        let trust = Arc::new(TrustIpStore::new());
        let forbidden = Arc::new(ForbiddenStore::new());
        let gate = TwoFactorGate::new(gate_config, trust.clone(), forbidden.clone(), verifier)?;
        let codec = TicketCodec::new(ticket_secret, clock.clone());

        Ok(Self {
            config,
            clock,
            codec,
            sessions,
            trust,
            forbidden,
            gate,
            identity,
        })
    }

    /// Start one sweeper per store.
    #[must_use]
    pub fn spawn_sweepers(&self) -> SweeperSet {
        let mut sweepers = SweeperSet::new();
        sweepers.spawn(self.sessions.clone(), self.clock.clone(), SESSION_SWEEP_INTERVAL);
        sweepers.spawn(self.trust.clone(), self.clock.clone(), TRUST_SWEEP_INTERVAL);
        sweepers.spawn(self.forbidden.clone(), self.clock.clone(), FORBIDDEN_SWEEP_INTERVAL);
        sweepers
    }

    #[must_use]
    pub const fn config(&self) -> &SsoConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    #[must_use]
    pub const fn codec(&self) -> &TicketCodec {
        &self.codec
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn trust(&self) -> &TrustIpStore {
        &self.trust
    }

    #[must_use]
    pub fn forbidden(&self) -> &ForbiddenStore {
        &self.forbidden
    }

    #[must_use]
    pub const fn gate(&self) -> &TwoFactorGate {
        &self.gate
    }

    #[must_use]
    pub fn identity(&self) -> &dyn IdentityLookup {
        self.identity.as_ref()
    }

    /// Provider QR page carrying `ticket` as the OAuth state.
    #[must_use]
    pub fn qr_connect_url(&self, ticket: &str) -> String {
        let redirect_uri = format!("{}{CALLBACK_PATH}", self.config.domain());
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("appid", self.config.provider_app_key())
            .append_pair("response_type", "code")
            .append_pair("scope", "snsapi_login")
            .append_pair("state", ticket)
            .append_pair("redirect_uri", &redirect_uri)
            .finish();
        format!("{}/connect/qrconnect?{query}", self.config.provider_url())
    }
}
