use super::state::AppState;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    sessions: usize,
    trust: usize,
    forbidden: usize,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up", body = Health),
    ),
    tag = "health",
)]
/// Build metadata plus the size of each store.
pub async fn health(method: Method, Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions().len(),
        trust: state.trust().len(),
        forbidden: state.forbidden().len(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    (StatusCode::OK, headers, body)
}

#[utoipa::path(
    get,
    path = "/version",
    responses(
        (status = 200, description = "Crate version", body = String),
    ),
    tag = "health",
)]
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, body_json, body_text, TestApp};
    use anyhow::{Context, Result};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_build_and_store_sizes() -> Result<()> {
        let TestApp { router, state, .. } = app();
        state
            .sessions()
            .put("ticket", "{}".to_string(), state.now() + 60);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let x_app = response
            .headers()
            .get("X-App")
            .context("missing X-App header")?
            .to_str()?
            .to_string();
        assert!(x_app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));

        let body = body_json(response).await?;
        assert_eq!(body["name"], json!(env!("CARGO_PKG_NAME")));
        assert_eq!(body["sessions"], json!(1));
        assert_eq!(body["trust"], json!(0));
        assert_eq!(body["forbidden"], json!(0));
        Ok(())
    }

    #[tokio::test]
    async fn options_health_has_no_body() -> Result<()> {
        let TestApp { router, .. } = app();
        let response = router
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));
        assert_eq!(body_text(response).await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn version_is_plain_text() -> Result<()> {
        let TestApp { router, .. } = app();
        let response = router
            .oneshot(Request::builder().uri("/version").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await?, env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}
