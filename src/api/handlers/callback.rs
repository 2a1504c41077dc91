//! Provider redirect target.
//!
//! `GET` is the first landing after the scan: the ticket is checked, the
//! authorization code resolved and either a session granted or the challenge
//! form rendered. `POST` is the challenge form submitting back to the same URL.

use super::{
    client_ip::client_ip,
    envelope::{html, popup, Envelope},
    notify::send_login_notices,
    scan::user_agent,
    state::AppState,
};
use crate::{
    provider::{LookupError, UserProfile},
    sso::{
        gate::GateState,
        ticket::{Fingerprint, VerifyMode},
    },
};
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, Extension, Form, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use utoipa::IntoParams;

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct CallbackArgs {
    /// Provider authorization code.
    code: Option<String>,
    /// The ticket minted by `/scan`.
    state: Option<String>,
}

/// Where the request stands in the two phase challenge.
enum Phase {
    Landing,
    Answer(Vec<(String, String)>),
}

struct Login<'a> {
    ticket: &'a str,
    ttl: u32,
    ip: String,
    user_agent: &'a str,
    profile: UserProfile,
}

#[utoipa::path(
    get,
    path = "/scan/callback",
    params(CallbackArgs),
    responses(
        (status = 200, description = "Popup envelope with the profile, or the challenge form", body = String),
        (status = 400, description = "Missing code or state", body = String),
        (status = 403, description = "Client or identity blocked, or login refused", body = String),
        (status = 410, description = "Ticket invalid or scan window elapsed", body = String),
        (status = 502, description = "Identity provider or verifier unavailable", body = String),
    ),
    tag = "sso",
)]
#[instrument(skip(state, headers, args))]
pub async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(args): Query<CallbackArgs>,
) -> Response {
    handle(&state, peer, &headers, args, Phase::Landing).await
}

#[utoipa::path(
    post,
    path = "/scan/callback",
    params(CallbackArgs),
    request_body(content = String, content_type = "application/x-www-form-urlencoded", description = "Challenge answers"),
    responses(
        (status = 200, description = "Popup envelope with the profile", body = String),
        (status = 400, description = "Missing code or state, or unreadable form", body = String),
        (status = 403, description = "Challenge rejected or identity blocked", body = String),
        (status = 410, description = "Ticket invalid or scan window elapsed", body = String),
        (status = 502, description = "Identity provider or verifier unavailable", body = String),
    ),
    tag = "sso",
)]
#[instrument(skip(state, headers, args, form))]
pub async fn callback_post(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(args): Query<CallbackArgs>,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Response {
    let fields = match form {
        Ok(Form(fields)) => fields,
        Err(err) => {
            debug!("Failed to parse challenge form: {err}");
            return popup(
                StatusCode::BAD_REQUEST,
                &Envelope::error("err:20", "unreadable form"),
            );
        }
    };
    handle(&state, peer, &headers, args, Phase::Answer(fields)).await
}

async fn handle(
    state: &AppState,
    peer: SocketAddr,
    headers: &HeaderMap,
    args: CallbackArgs,
    phase: Phase,
) -> Response {
    let (Some(code), Some(ticket)) = (args.code, args.state) else {
        return popup(
            StatusCode::BAD_REQUEST,
            &Envelope::error("err:20", "missing code or state"),
        );
    };

    let ip = client_ip(peer, headers, state.config().trusted_proxies());
    let fingerprint = Fingerprint::new(user_agent(headers), &ip);

    let ttl = match state.codec().verify(&ticket, fingerprint, VerifyMode::Scan) {
        Ok(ttl) => ttl,
        Err(err) => {
            debug!(client_ip = %ip, "Rejected ticket: {err}");
            return popup(StatusCode::GONE, &Envelope::error("err:23", "invalid ticket"));
        }
    };

    if state.gate().blocked(&ip, state.now()).is_some() {
        warn!(client_ip = %ip, "blocked client reached the callback");
        return popup(
            StatusCode::FORBIDDEN,
            &Envelope::error("err:31", "client blocked"),
        );
    }

    let profile = match state.identity().lookup(&code, fingerprint).await {
        Ok(profile) => profile,
        Err(err) => return lookup_failure(&err),
    };

    if let Some(entry) = state.gate().blocked(profile.block_key(), state.now()) {
        warn!(user_id = %profile.user_id, name = %entry.name, "blocked identity tried to log in");
        return popup(
            StatusCode::FORBIDDEN,
            &Envelope::error("err:33", "account blocked"),
        );
    }

    let login = Login {
        ticket: &ticket,
        ttl,
        ip,
        user_agent: user_agent(headers),
        profile,
    };

    match (state.gate().decide(&login.ip, state.now()), phase) {
        (GateState::ChallengeIssued, Phase::Landing) => {
            match state.gate().present(&login.profile).await {
                Ok(form) => html(StatusCode::OK, form),
                Err(err) => verifier_failure(&err.to_string()),
            }
        }
        (GateState::ChallengeIssued, Phase::Answer(fields)) => {
            let verdict = state
                .gate()
                .submit(&login.profile, &fields, state.now())
                .await;
            match verdict {
                Ok(GateState::Failed { reason }) => {
                    popup(StatusCode::FORBIDDEN, &Envelope::error("err:34", &reason))
                }
                Ok(outcome) if outcome.grants() => grant(state, login).await,
                Ok(_) => verifier_failure("unexpected verifier state"),
                Err(err) => verifier_failure(&err.to_string()),
            }
        }
        (_, _) => grant(state, login).await,
    }
}

async fn grant(state: &AppState, login: Login<'_>) -> Response {
    let Login {
        ticket,
        ttl,
        ip,
        user_agent,
        mut profile,
    } = login;
    profile.ticket = ticket.to_string();

    let detail = match serde_json::to_value(&profile) {
        Ok(detail) => detail,
        Err(err) => {
            error!("Failed to serialize profile: {err}");
            return popup(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Envelope::error("err:19", "profile unavailable"),
            );
        }
    };

    let now = state.now();
    state
        .sessions()
        .put(ticket, detail.to_string(), now + i64::from(ttl));
    send_login_notices(state, &profile, &ip, user_agent).await;
    if let Some(entry) = state.gate().record_login(&ip, now) {
        debug!(client_ip = %ip, logins = entry.total_login_count, "client ip trusted");
    }

    info!(user_id = %profile.user_id, client_ip = %ip, ttl, "login granted");
    popup(StatusCode::OK, &Envelope::ok(detail))
}

fn lookup_failure(err: &LookupError) -> Response {
    let status = match err {
        LookupError::NotMember { .. } | LookupError::Inactive => StatusCode::FORBIDDEN,
        LookupError::Unavailable { .. } | LookupError::Api { .. } => StatusCode::BAD_GATEWAY,
    };
    if let LookupError::Api { raw, .. } | LookupError::NotMember { raw } = err {
        debug!(raw = %raw, "provider response");
    }
    warn!("Identity lookup failed: {err}");
    popup(status, &Envelope::error(err.code(), &err.to_string()))
}

fn verifier_failure(detail: &str) -> Response {
    error!("Challenge verifier failed: {detail}");
    popup(
        StatusCode::BAD_GATEWAY,
        &Envelope::error("err:32", "verifier unavailable"),
    )
}
