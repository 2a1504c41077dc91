//! Operator view of the in-memory stores, reachable from loopback only.

use super::{client_ip::is_loopback, state::AppState};
use crate::provider::ContactType;
use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct SessionView {
    ticket: String,
    remaining_seconds: i64,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TrustView {
    ip: String,
    total_login_count: u64,
    remaining_seconds: i64,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ForbiddenView {
    key: String,
    name: String,
    #[schema(value_type = u8)]
    contact_type: ContactType,
    mobile: String,
    remaining_seconds: i64,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct Overview {
    two_factor: bool,
    sessions: Vec<SessionView>,
    trust: Vec<TrustView>,
    forbidden: Vec<ForbiddenView>,
}

fn overview(state: &AppState) -> Overview {
    let now = state.now();

    let mut sessions: Vec<SessionView> = state
        .sessions()
        .snapshot()
        .into_iter()
        .filter(|(_, record)| record.expires_at > now)
        .map(|(ticket, record)| SessionView {
            ticket,
            remaining_seconds: record.expires_at - now,
        })
        .collect();
    sessions.sort_by(|a, b| a.ticket.cmp(&b.ticket));

    let mut trust: Vec<TrustView> = state
        .trust()
        .snapshot()
        .into_iter()
        .filter(|(_, entry)| entry.expires_at > now)
        .map(|(ip, entry)| TrustView {
            ip,
            total_login_count: entry.total_login_count,
            remaining_seconds: entry.expires_at - now,
        })
        .collect();
    trust.sort_by(|a, b| a.ip.cmp(&b.ip));

    let mut forbidden: Vec<ForbiddenView> = state
        .forbidden()
        .snapshot()
        .into_iter()
        .filter(|(_, entry)| entry.expires_at > now)
        .map(|(key, entry)| ForbiddenView {
            key,
            name: entry.name,
            contact_type: entry.contact_type,
            mobile: entry.mobile,
            remaining_seconds: entry.expires_at - now,
        })
        .collect();
    forbidden.sort_by(|a, b| a.key.cmp(&b.key));

    Overview {
        two_factor: state.gate().config().enabled(),
        sessions,
        trust,
        forbidden,
    }
}

#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Live store entries", body = Overview),
        (status = 403, description = "Caller is not on loopback"),
    ),
    tag = "admin",
)]
#[instrument(skip(state))]
pub async fn admin(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !is_loopback(peer.ip()) {
        warn!(peer = %peer.ip(), "admin access refused");
        return StatusCode::FORBIDDEN.into_response();
    }

    Json(overview(&state)).into_response()
}

#[utoipa::path(
    delete,
    path = "/admin/{store}/{key}",
    params(
        ("store" = String, Path, description = "sessions, trust or forbidden"),
        ("key" = String, Path, description = "Ticket, ip or blocked identity"),
    ),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 403, description = "Caller is not on loopback"),
        (status = 404, description = "Unknown store or key"),
    ),
    tag = "admin",
)]
#[instrument(skip(state))]
pub async fn remove(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((store, key)): Path<(String, String)>,
) -> StatusCode {
    if !is_loopback(peer.ip()) {
        warn!(peer = %peer.ip(), "admin access refused");
        return StatusCode::FORBIDDEN;
    }

    let removed = match store.as_str() {
        "sessions" => state.sessions().delete(&key),
        "trust" => state.trust().delete(&key),
        "forbidden" => state.forbidden().delete(&key),
        _ => false,
    };

    if removed {
        info!(%store, %key, "entry removed by operator");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, body_json, build, config, TestApp};
    use crate::{
        provider::ContactType,
        sso::{gate::GateConfig, store::ForbiddenEntry},
    };
    use anyhow::Result;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn seed(test_app: &TestApp) {
        let now = test_app.state.now();
        test_app
            .state
            .sessions()
            .put("ticket-b", "{}".to_string(), now + 30);
        test_app
            .state
            .sessions()
            .put("ticket-a", "{}".to_string(), now + 10);
        test_app
            .state
            .sessions()
            .put("ticket-old", "{}".to_string(), now);
        test_app.state.trust().increment("10.0.0.9", now, 600);
        test_app.state.forbidden().block(
            "open-1",
            ForbiddenEntry {
                name: "Ada".to_string(),
                contact_type: ContactType::External,
                mobile: "138".to_string(),
                expires_at: now + 90,
            },
        );
    }

    #[tokio::test]
    async fn overview_lists_live_entries() -> Result<()> {
        let test_app = app();
        seed(&test_app);

        let response = test_app
            .router
            .oneshot(Request::builder().uri("/admin").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await?;
        assert_eq!(body["two_factor"], json!(false));
        assert_eq!(
            body["sessions"],
            json!([
                {"ticket": "ticket-a", "remaining_seconds": 10},
                {"ticket": "ticket-b", "remaining_seconds": 30},
            ])
        );
        assert_eq!(
            body["trust"],
            json!([{"ip": "10.0.0.9", "total_login_count": 1, "remaining_seconds": 600}])
        );
        assert_eq!(body["forbidden"][0]["key"], json!("open-1"));
        assert_eq!(body["forbidden"][0]["contact_type"], json!(1));
        assert_eq!(body["forbidden"][0]["remaining_seconds"], json!(90));
        Ok(())
    }

    #[tokio::test]
    async fn delete_entries() -> Result<()> {
        let test_app = app();
        seed(&test_app);

        for (uri, status) in [
            ("/admin/sessions/ticket-a", StatusCode::NO_CONTENT),
            ("/admin/sessions/ticket-a", StatusCode::NOT_FOUND),
            ("/admin/trust/10.0.0.9", StatusCode::NO_CONTENT),
            ("/admin/forbidden/open-1", StatusCode::NO_CONTENT),
            ("/admin/unknown/open-1", StatusCode::NOT_FOUND),
        ] {
            let response = test_app
                .router
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri(uri)
                        .body(Body::empty())?,
                )
                .await?;
            assert_eq!(response.status(), status, "{uri}");
        }

        assert_eq!(test_app.state.sessions().len(), 2);
        assert!(test_app.state.trust().is_empty());
        assert!(test_app.state.forbidden().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn non_loopback_is_forbidden() -> Result<()> {
        let peer = SocketAddr::from(([10, 0, 0, 5], 40000));
        let test_app = build(config(), GateConfig::new(), peer);
        seed(&test_app);

        let response = test_app
            .router
            .clone()
            .oneshot(Request::builder().uri("/admin").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = test_app
            .router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/admin/sessions/ticket-a")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(test_app.state.sessions().len(), 3);
        Ok(())
    }
}
