use super::{
    client_ip::client_ip,
    envelope::{popup, Envelope},
    state::AppState,
};
use crate::sso::ticket::Fingerprint;
use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{
        header::{LOCATION, USER_AGENT},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, instrument, warn};
use utoipa::IntoParams;

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct ScanArgs {
    /// Session ttl in seconds; invalid or out of range values fall back to 30.
    ttl: Option<String>,
}

pub(crate) fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[utoipa::path(
    get,
    path = "/scan",
    params(ScanArgs),
    responses(
        (status = 302, description = "Redirect to the provider QR page"),
        (status = 403, description = "Client IP is blocked", body = String),
        (status = 500, description = "Ticket could not be minted", body = String),
    ),
    tag = "sso",
)]
#[instrument(skip(state, headers, args))]
pub async fn scan(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(args): Query<ScanArgs>,
) -> Response {
    start_scan(&state, peer, &headers, args.ttl.as_deref())
}

#[utoipa::path(
    post,
    path = "/scan",
    params(ScanArgs),
    responses(
        (status = 302, description = "Redirect to the provider QR page"),
        (status = 403, description = "Client IP is blocked", body = String),
    ),
    tag = "sso",
)]
#[instrument(skip(state, headers, args))]
pub async fn scan_post(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(args): Query<ScanArgs>,
) -> Response {
    start_scan(&state, peer, &headers, args.ttl.as_deref())
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("Invalid redirect location: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn start_scan(state: &AppState, peer: SocketAddr, headers: &HeaderMap, ttl: Option<&str>) -> Response {
    let ip = client_ip(peer, headers, state.config().trusted_proxies());
    let now = state.now();

    if state.gate().blocked(&ip, now).is_some() {
        warn!(client_ip = %ip, "blocked client tried to scan");
        return popup(
            StatusCode::FORBIDDEN,
            &Envelope::error("err:31", "client blocked"),
        );
    }

    let ttl = state.config().ticket_ttl(ttl);
    let fingerprint = Fingerprint::new(user_agent(headers), &ip);

    match state.codec().mint(fingerprint, ttl) {
        Ok(ticket) => {
            debug!(client_ip = %ip, ttl, "ticket minted");
            found(&state.qr_connect_url(&ticket))
        }
        Err(err) => {
            error!("Failed to mint ticket: {err}");
            popup(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Envelope::error("err:30", "ticket unavailable"),
            )
        }
    }
}
