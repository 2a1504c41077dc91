//! Router wired with in-memory collaborators and a manual clock.

use super::{
    notify::NotifyConfig,
    state::{AppState, SsoConfig},
};
use crate::{
    challenge::{ChallengeVerifier, VerifierError, VerifierFuture},
    provider::{
        ContactType, IdentityLookup, LookupError, LookupFuture, Notice, NotifyFuture, UserProfile,
    },
    sso::{
        clock::ManualClock,
        gate::GateConfig,
        ticket::{Fingerprint, TicketError},
    },
};
use anyhow::Result;
use axum::{extract::connect_info::MockConnectInfo, response::Response, Router};
use secrecy::SecretString;
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

pub(crate) const NOW: i64 = 1_700_000_000;
pub(crate) const USER_AGENT: &str = "UA1";
pub(crate) const TRUST_SECONDS: i64 = 86_400;

pub(crate) fn profile() -> UserProfile {
    UserProfile {
        name: "Ada".to_string(),
        contact_type: ContactType::Internal,
        mobile: "13800000000".to_string(),
        union_id: "union-1".to_string(),
        user_id: "user-1".to_string(),
        open_id: "open-1".to_string(),
        ..UserProfile::default()
    }
}

pub(crate) struct FakeLookup {
    result: Mutex<Result<UserProfile, LookupError>>,
    calls: AtomicUsize,
    notices: Mutex<Vec<Notice>>,
    notify_error: Mutex<Option<LookupError>>,
}

impl FakeLookup {
    fn new() -> Self {
        Self {
            result: Mutex::new(Ok(profile())),
            calls: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
            notify_error: Mutex::new(None),
        }
    }

    pub(crate) fn fail_with(&self, err: LookupError) {
        *self.result.lock().unwrap() = Err(err);
    }

    pub(crate) fn respond_with(&self, profile: UserProfile) {
        *self.result.lock().unwrap() = Ok(profile);
    }

    /// Every notice is still recorded, then refused with `err`.
    pub(crate) fn fail_notify_with(&self, err: LookupError) {
        *self.notify_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityLookup for FakeLookup {
    fn lookup<'a>(&'a self, _code: &'a str, _fingerprint: Fingerprint<'a>) -> LookupFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.lock().unwrap().clone()
        })
    }

    fn notify<'a>(&'a self, notice: &'a Notice) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.notices.lock().unwrap().push(notice.clone());
            self.notify_error.lock().unwrap().clone().map_or(Ok(()), Err)
        })
    }
}

pub(crate) struct FakeVerifier {
    verdict: Mutex<Result<String, VerifierError>>,
    fields: Mutex<Vec<(String, String)>>,
    submissions: AtomicUsize,
}

impl FakeVerifier {
    fn new() -> Self {
        Self {
            verdict: Mutex::new(Ok("success".to_string())),
            fields: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
        }
    }

    pub(crate) fn answer_with(&self, verdict: Result<String, VerifierError>) {
        *self.verdict.lock().unwrap() = verdict;
    }

    pub(crate) fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub(crate) fn last_fields(&self) -> Vec<(String, String)> {
        self.fields.lock().unwrap().clone()
    }
}

impl ChallengeVerifier for FakeVerifier {
    fn present<'a>(&'a self, _profile: &'a UserProfile) -> VerifierFuture<'a> {
        Box::pin(async { Ok("<form>challenge</form>".to_string()) })
    }

    fn submit<'a>(
        &'a self,
        _profile: &'a UserProfile,
        fields: &'a [(String, String)],
    ) -> VerifierFuture<'a> {
        Box::pin(async move {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            *self.fields.lock().unwrap() = fields.to_vec();
            self.verdict.lock().unwrap().clone()
        })
    }
}

pub(crate) struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub lookup: Arc<FakeLookup>,
    pub verifier: Arc<FakeVerifier>,
}

pub(crate) fn config() -> SsoConfig {
    SsoConfig::new("https://sso.example.com".to_string()).with_provider(
        "https://oapi.dingtalk.com".to_string(),
        "app-key".to_string(),
    )
}

/// Gate off, trust on, peer 127.0.0.1.
pub(crate) fn app() -> TestApp {
    app_with(GateConfig::new().with_trust_seconds(TRUST_SECONDS))
}

pub(crate) fn app_with(gate: GateConfig) -> TestApp {
    build(config(), gate, SocketAddr::from(([127, 0, 0, 1], 40000)))
}

/// Like [`app`], with login notices configured.
pub(crate) fn app_notifying(notify: NotifyConfig) -> TestApp {
    build(
        config().with_notify(notify),
        GateConfig::new().with_trust_seconds(TRUST_SECONDS),
        SocketAddr::from(([127, 0, 0, 1], 40000)),
    )
}

pub(crate) fn build(config: SsoConfig, gate: GateConfig, peer: SocketAddr) -> TestApp {
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let lookup = Arc::new(FakeLookup::new());
    let verifier = Arc::new(FakeVerifier::new());

    let state = Arc::new(
        AppState::new(
            config,
            SecretString::from("ticket-secret"),
            gate,
            lookup.clone(),
            Some(verifier.clone()),
            clock.clone(),
        )
        .unwrap(),
    );

    let router = crate::api::app(state.clone()).layer(MockConnectInfo(peer));

    TestApp {
        router,
        state,
        clock,
        lookup,
        verifier,
    }
}

/// Ticket minted for the default test browser on 127.0.0.1.
pub(crate) fn ticket_for(state: &AppState, ttl: u32) -> Result<String, TicketError> {
    state
        .codec()
        .mint(Fingerprint::new(USER_AGENT, "127.0.0.1"), ttl)
}

pub(crate) async fn body_text(response: Response) -> Result<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Decode a JSON body, or the trailing (entity escaped) envelope of a popup body.
pub(crate) async fn body_json(response: Response) -> Result<Value> {
    let text = body_text(response).await?;
    let json = match text.split_once("</script>") {
        Some((_, envelope)) => html_unescape(envelope),
        None => text,
    };
    Ok(serde_json::from_str(&json)?)
}

fn html_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
