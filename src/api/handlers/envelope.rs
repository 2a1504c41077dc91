//! Response envelopes shared by the handlers.
//!
//! Backends get `{"err": code, "detail": value}` as JSON. The provider popup
//! gets the same envelope posted to its opener, followed by the envelope text.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

pub const OK_CODE: &str = "0";

#[derive(ToSchema, Serialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub err: String,
    #[schema(value_type = Object)]
    pub detail: Value,
}

impl Envelope {
    #[must_use]
    pub fn ok(detail: Value) -> Self {
        Self {
            err: OK_CODE.to_string(),
            detail,
        }
    }

    #[must_use]
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            err: code.to_string(),
            detail: Value::String(message.to_string()),
        }
    }
}

/// JSON envelope for backend-facing endpoints.
pub fn json(status: StatusCode, envelope: &Envelope) -> Response {
    (status, Json(envelope)).into_response()
}

/// HTML envelope for the provider popup window.
pub fn popup(status: StatusCode, envelope: &Envelope) -> Response {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        format!(r#"{{"err":"{}","detail":null}}"#, envelope.err)
    });
    // Keep the payload from closing the script element early.
    let script_safe = json.replace("</", "<\\/");
    let body = format!(
        "<script>window.opener.postMessage({script_safe}, '*');window.close()</script>{}",
        html_escape(&json)
    );
    html(status, body)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

pub fn html(status: StatusCode, body: String) -> Response {
    (
        status,
        [(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}
