//! Delegated second-factor challenge.
//!
//! The verifier is an external HTTP endpoint that renders its own form. Both
//! steps are form-encoded POSTs carrying `sso_step` and the serialized profile
//! as `sso_user`; the second step forwards whatever the end user submitted.

use crate::{provider::UserProfile, APP_USER_AGENT};
use anyhow::{Context, Result};
use reqwest::Client;
use std::{future::Future, pin::Pin, time::Duration};
use tracing::{debug, instrument};
use url::Url;

/// Body the verifier returns when the second factor checks out.
pub const VERIFIED_BODY: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    /// Transport or protocol failure; the user did nothing wrong.
    #[error("challenge verifier unavailable: {detail}")]
    Unavailable { detail: String },
}

pub type VerifierFuture<'a> = Pin<Box<dyn Future<Output = Result<String, VerifierError>> + Send + 'a>>;

pub trait ChallengeVerifier: Send + Sync {
    /// Phase 1: the rendered challenge form.
    fn present<'a>(&'a self, profile: &'a UserProfile) -> VerifierFuture<'a>;

    /// Phase 2: the verifier's verdict, [`VERIFIED_BODY`] or a rejection reason.
    fn submit<'a>(
        &'a self,
        profile: &'a UserProfile,
        fields: &'a [(String, String)],
    ) -> VerifierFuture<'a>;
}

#[derive(Debug)]
pub struct HttpChallengeVerifier {
    client: Client,
    url: Url,
}

impl HttpChallengeVerifier {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid two-factor URL: {url}"))?;

        let mut builder = Client::builder().user_agent(APP_USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("Failed to build two-factor client")?;

        Ok(Self { client, url })
    }

    #[instrument(skip(self, profile, answers), fields(user_id = %profile.user_id))]
    async fn post(
        &self,
        step: &str,
        profile: &UserProfile,
        answers: &[(String, String)],
    ) -> Result<String, VerifierError> {
        let user = serde_json::to_string(profile).map_err(|err| VerifierError::Unavailable {
            detail: format!("failed to serialize profile: {err}"),
        })?;

        // Caller fields first; the step markers always win.
        let mut form: Vec<(&str, &str)> = answers
            .iter()
            .filter(|(name, _)| name != "sso_step" && name != "sso_user")
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        form.push(("sso_step", step));
        form.push(("sso_user", user.as_str()));

        let response = self
            .client
            .post(self.url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| VerifierError::Unavailable {
                detail: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifierError::Unavailable {
                detail: format!("verifier answered {status}"),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| VerifierError::Unavailable {
                detail: err.to_string(),
            })?;
        debug!(step, bytes = body.len(), "verifier responded");
        Ok(body)
    }
}

impl ChallengeVerifier for HttpChallengeVerifier {
    fn present<'a>(&'a self, profile: &'a UserProfile) -> VerifierFuture<'a> {
        Box::pin(self.post("1", profile, &[]))
    }

    fn submit<'a>(
        &'a self,
        profile: &'a UserProfile,
        fields: &'a [(String, String)],
    ) -> VerifierFuture<'a> {
        Box::pin(self.post("2", profile, fields))
    }
}
