//! Backend facing ticket redemption.
//!
//! Business backends post the ticket together with the fingerprint of the
//! browser that scanned (its user agent and client ip), so a ticket is only
//! redeemable on behalf of the browser it was minted for.

use super::{
    client_ip::is_internal,
    envelope::{json, Envelope},
    state::AppState,
};
use crate::sso::ticket::{Fingerprint, VerifyMode};
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, Extension, Form},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

pub const RENEW_FLAG: &str = "1";

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct RedeemForm {
    sso_ticket: Option<String>,
    /// `1` to push the session expiry to now + ticket ttl.
    renew: Option<String>,
    user_agent: Option<String>,
    client_ip: Option<String>,
}

impl RedeemForm {
    fn fingerprint(&self) -> Fingerprint<'_> {
        Fingerprint::new(
            self.user_agent.as_deref().unwrap_or_default(),
            self.client_ip.as_deref().unwrap_or_default(),
        )
    }
}

/// The ticket and its ttl, or the response explaining why there is none.
fn checked_ticket<'a>(
    state: &AppState,
    form: &'a Result<Form<RedeemForm>, FormRejection>,
) -> Result<(&'a str, u32), Response> {
    let form = match form {
        Ok(Form(form)) => form,
        Err(err) => {
            debug!("Failed to parse redeem form: {err}");
            return Err(json(
                StatusCode::BAD_REQUEST,
                &Envelope::error("err:20", "unreadable form"),
            ));
        }
    };

    let Some(ticket) = form.sso_ticket.as_deref().filter(|t| !t.is_empty()) else {
        return Err(json(
            StatusCode::BAD_REQUEST,
            &Envelope::error("err:21", "missing ticket"),
        ));
    };

    match state
        .codec()
        .verify(ticket, form.fingerprint(), VerifyMode::Fetch)
    {
        Ok(ttl) => Ok((ticket, ttl)),
        Err(err) => {
            debug!("Rejected ticket on redemption: {err}");
            Err(json(
                StatusCode::GONE,
                &Envelope::error("err:28", "invalid ticket"),
            ))
        }
    }
}

#[utoipa::path(
    post,
    path = "/ticket",
    request_body(content = RedeemForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Profile of the user who scanned", body = Envelope),
        (status = 400, description = "Missing ticket", body = Envelope),
        (status = 404, description = "No live session for the ticket", body = Envelope),
        (status = 410, description = "Ticket invalid for this fingerprint", body = Envelope),
    ),
    tag = "sso",
)]
#[instrument(skip(state, form))]
pub async fn fetch(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    form: Result<Form<RedeemForm>, FormRejection>,
) -> Response {
    let (ticket, ttl) = match checked_ticket(&state, &form) {
        Ok(checked) => checked,
        Err(response) => return response,
    };

    let now = state.now();
    let record = match state.sessions().get(ticket, now) {
        Ok(record) => record,
        Err(err) => {
            debug!("No session for ticket: {err}");
            return json(
                StatusCode::NOT_FOUND,
                &Envelope::error("err:22", "ticket not found"),
            );
        }
    };

    let renew = form
        .as_ref()
        .is_ok_and(|Form(form)| form.renew.as_deref() == Some(RENEW_FLAG));
    if renew {
        if state.config().allow_ticket_renew() && is_internal(peer.ip()) {
            if let Err(err) = state.sessions().renew(ticket, now + i64::from(ttl), now) {
                debug!("Session vanished before renewal: {err}");
            } else {
                info!(ttl, "session renewed");
            }
        } else {
            debug!(peer = %peer.ip(), "renewal refused");
        }
    }

    match serde_json::from_str::<Value>(&record.payload) {
        Ok(profile) => json(StatusCode::OK, &Envelope::ok(profile)),
        Err(err) => {
            error!("Stored session payload is not JSON: {err}");
            json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Envelope::error("err:19", "profile unavailable"),
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/ttl",
    request_body(content = RedeemForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Remaining session seconds", body = String),
        (status = 400, description = "Missing ticket", body = Envelope),
        (status = 404, description = "No live session for the ticket", body = String),
        (status = 410, description = "Ticket invalid for this fingerprint", body = Envelope),
    ),
    tag = "sso",
)]
#[instrument(skip(state, form))]
pub async fn ttl(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<RedeemForm>, FormRejection>,
) -> Response {
    let (ticket, _) = match checked_ticket(&state, &form) {
        Ok(checked) => checked,
        Err(response) => return response,
    };

    match state.sessions().remaining(ticket, state.now()) {
        Ok(seconds) => (StatusCode::OK, seconds.to_string()).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "ticket not found").into_response(),
    }
}
