//! DingTalk open API identity lookup.

use super::{
    ContactType, DeptInfo, IdentityLookup, LookupError, LookupFuture, Notice, NotifyFuture,
    ProviderRaw, UserProfile,
};
use crate::{sso::ticket::Fingerprint, APP_USER_AGENT};
use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_PROVIDER_URL: &str = "https://oapi.dingtalk.com";

/// Attempts per token-authenticated call, counting the first one.
const MAX_TOKEN_ATTEMPTS: u32 = 3;
const INVALID_TOKEN_SUB_CODE: &str = "40014";
const NOT_FOUND_ERRCODE: i64 = 60121;
const WORK_NOTICE_PATH: &str = "/topapi/message/corpconversation/asyncsend_v2";

/// Why a single provider call failed.
#[derive(Debug)]
enum CallError {
    Transport(String),
    Rejected {
        errcode: Option<i64>,
        sub_code: Option<String>,
        raw: String,
    },
}

impl CallError {
    fn invalid_token(&self) -> bool {
        matches!(self, Self::Rejected { sub_code: Some(code), .. } if code == INVALID_TOKEN_SUB_CODE)
    }

    fn into_lookup(self) -> LookupError {
        match self {
            Self::Transport(detail) => LookupError::Unavailable { detail },
            Self::Rejected {
                errcode: Some(NOT_FOUND_ERRCODE),
                raw,
                ..
            } => LookupError::NotMember { raw },
            Self::Rejected { errcode, raw, .. } => LookupError::Api { errcode, raw },
        }
    }
}

/// A successful (`errcode == 0`) provider response.
#[derive(Debug)]
struct Reply {
    raw: String,
    body: Value,
}

impl Reply {
    fn required_str(&self, path: &[&str]) -> Result<String, LookupError> {
        get_str(&self.body, path)
            .map(ToString::to_string)
            .ok_or_else(|| self.missing())
    }

    fn optional_str(&self, path: &[&str]) -> String {
        get_str(&self.body, path).unwrap_or_default().to_string()
    }

    fn missing(&self) -> LookupError {
        LookupError::Api {
            errcode: None,
            raw: self.raw.clone(),
        }
    }
}

fn get_value<'a>(body: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = body;
    for key in path {
        current = current.get(*key)?;
    }
    Some(current)
}

fn get_str<'a>(body: &'a Value, path: &[&str]) -> Option<&'a str> {
    get_value(body, path).and_then(Value::as_str)
}

pub struct DingTalkLookup {
    client: Client,
    base_url: Url,
    app_key: String,
    app_secret: SecretString,
    agent_id: Option<String>,
    access_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for DingTalkLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DingTalkLookup")
            .field("base_url", &self.base_url.as_str())
            .field("app_key", &self.app_key)
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl DingTalkLookup {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        app_key: String,
        app_secret: SecretString,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid provider URL: {base_url}"))?;

        let mut builder = Client::builder().user_agent(APP_USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build provider client")?;

        Ok(Self {
            client,
            base_url,
            app_key,
            app_secret,
            agent_id: None,
            access_token: RwLock::new(None),
        })
    }

    /// Microapp agent id that work notices are sent as.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: String) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// `base64(HMAC-SHA256(app_secret, timestamp))`; percent encoding happens when
    /// it is placed in the query string.
    fn signature(&self, timestamp: &str) -> Result<String, LookupError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.app_secret.expose_secret().as_bytes())
            .map_err(|err| LookupError::Unavailable {
                detail: format!("invalid app secret: {err}"),
            })?;
        mac.update(timestamp.as_bytes());
        Ok(Base64::encode_string(&mac.finalize().into_bytes()))
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, CallError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| CallError::Transport(format!("invalid endpoint {path}: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn call(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Reply, CallError> {
        debug!(path = url.path(), "provider request");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;
        let raw = response
            .text()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;

        let Ok(body) = serde_json::from_str::<Value>(&raw) else {
            return Err(CallError::Rejected {
                errcode: None,
                sub_code: None,
                raw,
            });
        };

        match body.get("errcode").and_then(Value::as_i64) {
            Some(0) => Ok(Reply { raw, body }),
            errcode => Err(CallError::Rejected {
                errcode,
                sub_code: get_str(&body, &["sub_code"]).map(ToString::to_string),
                raw,
            }),
        }
    }

    async fn fetch_access_token(&self) -> Result<String, LookupError> {
        let url = self
            .endpoint(
                "/gettoken",
                &[
                    ("appkey", self.app_key.as_str()),
                    ("appsecret", self.app_secret.expose_secret()),
                ],
            )
            .map_err(CallError::into_lookup)?;
        let reply = self
            .call(Method::GET, url, None)
            .await
            .map_err(CallError::into_lookup)?;
        let token = reply.required_str(&["access_token"])?;

        *self.access_token.write().await = Some(token.clone());
        info!("provider access token refreshed");
        Ok(token)
    }

    async fn access_token(&self) -> Result<String, LookupError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.fetch_access_token().await
    }

    /// POST to a token-authenticated endpoint, refreshing the token when the
    /// provider reports it invalid.
    async fn post_with_token(&self, path: &str, body: &Value) -> Result<Reply, LookupError> {
        let mut token = self.access_token().await?;

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let url = self
                .endpoint(path, &[("access_token", token.as_str())])
                .map_err(CallError::into_lookup)?;
            match self.call(Method::POST, url, Some(body)).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.invalid_token() && attempt < MAX_TOKEN_ATTEMPTS => {
                    warn!(path, attempt, "provider rejected access token, refreshing");
                    let backoff = rand::thread_rng().gen_range(50..150);
                    sleep(Duration::from_millis(backoff)).await;
                    token = self.fetch_access_token().await?;
                }
                Err(err) => return Err(err.into_lookup()),
            }
        }

        Err(LookupError::Unavailable {
            detail: format!("access token still invalid after {MAX_TOKEN_ATTEMPTS} attempts"),
        })
    }

    async fn resolve(&self, code: &str) -> Result<UserProfile, LookupError> {
        let mut raw = ProviderRaw::default();

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.signature(&timestamp)?;
        let url = self
            .endpoint(
                "/sns/getuserinfo_bycode",
                &[
                    ("accessKey", self.app_key.as_str()),
                    ("timestamp", timestamp.as_str()),
                    ("signature", signature.as_str()),
                ],
            )
            .map_err(CallError::into_lookup)?;
        let user_info = self
            .call(Method::POST, url, Some(&json!({ "tmp_auth_code": code })))
            .await
            .map_err(CallError::into_lookup)?;
        raw.user_info.clone_from(&user_info.raw);

        let union_id = user_info.required_str(&["user_info", "unionid"])?;
        let open_id = user_info.optional_str(&["user_info", "openid"]);
        let nick_name = user_info.optional_str(&["user_info", "nick"]);

        let union = self
            .post_with_token("/topapi/user/getbyunionid", &json!({ "unionid": union_id }))
            .await?;
        raw.user_union.clone_from(&union.raw);

        let user_id = union.required_str(&["result", "userid"])?;
        let contact_type = get_value(&union.body, &["result", "contact_type"])
            .and_then(Value::as_u64)
            .and_then(|value| u8::try_from(value).ok())
            .and_then(|value| ContactType::try_from(value).ok())
            .ok_or_else(|| union.missing())?;

        let mut profile = match contact_type {
            ContactType::Internal => self.internal_profile(&user_id, raw).await?,
            ContactType::External => {
                let mut external = self.external_profile(&user_id, raw).await?;
                let follower = self
                    .internal_profile(&external.follower_user_id, ProviderRaw::default())
                    .await?;
                external.follower = Some(Box::new(follower));
                external
            }
        };

        profile.union_id = union_id;
        profile.open_id = open_id;
        profile.nick_name = nick_name;
        Ok(profile)
    }

    async fn internal_profile(
        &self,
        user_id: &str,
        mut raw: ProviderRaw,
    ) -> Result<UserProfile, LookupError> {
        let user = self
            .post_with_token("/topapi/v2/user/get", &json!({ "userid": user_id }))
            .await?;
        raw.user.clone_from(&user.raw);

        let active = get_value(&user.body, &["result", "active"])
            .and_then(Value::as_bool)
            .ok_or_else(|| user.missing())?;
        if !active {
            return Err(LookupError::Inactive);
        }

        let dept_ids: Vec<i64> = get_value(&user.body, &["result", "dept_id_list"])
            .and_then(Value::as_array)
            .ok_or_else(|| user.missing())?
            .iter()
            .filter_map(Value::as_i64)
            .collect();
        if dept_ids.is_empty() {
            return Err(user.missing());
        }

        let mut departments = Vec::with_capacity(dept_ids.len());
        for dept_id in dept_ids {
            let id = dept_id.to_string();
            let dept = self
                .post_with_token("/topapi/v2/department/get", &json!({ "dept_id": id }))
                .await?;
            raw.departments.push(dept.raw.clone());

            let name = dept.required_str(&["result", "name"])?;
            let is_owner = get_value(&dept.body, &["result", "dept_manager_userid_list"])
                .and_then(Value::as_array)
                .is_some_and(|managers| managers.iter().any(|m| m.as_str() == Some(user_id)));

            departments.push(DeptInfo {
                id,
                name,
                is_owner: if is_owner { "1" } else { "0" }.to_string(),
            });
        }

        Ok(UserProfile {
            name: user.optional_str(&["result", "name"]),
            contact_type: ContactType::Internal,
            mobile: user.optional_str(&["result", "mobile"]),
            departments,
            avatar: user.optional_str(&["result", "avatar"]),
            job_title: user.optional_str(&["result", "title"]),
            state_code: user.optional_str(&["result", "state_code"]),
            user_id: user_id.to_string(),
            provider_raw: raw,
            ..UserProfile::default()
        })
    }

    async fn external_profile(
        &self,
        user_id: &str,
        mut raw: ProviderRaw,
    ) -> Result<UserProfile, LookupError> {
        let contact = self
            .post_with_token("/topapi/extcontact/get", &json!({ "user_id": user_id }))
            .await?;
        raw.external_contact_info.clone_from(&contact.raw);

        if get_value(&contact.body, &["result"]).is_none() {
            return Err(contact.missing());
        }

        Ok(UserProfile {
            name: contact.optional_str(&["result", "name"]),
            contact_type: ContactType::External,
            mobile: contact.optional_str(&["result", "mobile"]),
            job_title: contact.optional_str(&["result", "title"]),
            state_code: contact.optional_str(&["result", "state_code"]),
            company_name: contact.optional_str(&["result", "company_name"]),
            email: contact.optional_str(&["result", "email"]),
            address: contact.optional_str(&["result", "address"]),
            remark: contact.optional_str(&["result", "remark"]),
            follower_user_id: contact.optional_str(&["result", "follower_user_id"]),
            user_id: user_id.to_string(),
            provider_raw: raw,
            ..UserProfile::default()
        })
    }
}

impl IdentityLookup for DingTalkLookup {
    fn lookup<'a>(&'a self, code: &'a str, fingerprint: Fingerprint<'a>) -> LookupFuture<'a> {
        Box::pin(self.lookup_instrumented(code, fingerprint))
    }

    fn notify<'a>(&'a self, notice: &'a Notice) -> NotifyFuture<'a> {
        Box::pin(self.send_work_notice(notice))
    }
}

impl DingTalkLookup {
    #[instrument(skip(self, code, fingerprint), fields(client_ip = fingerprint.client_ip))]
    async fn lookup_instrumented(
        &self,
        code: &str,
        fingerprint: Fingerprint<'_>,
    ) -> Result<UserProfile, LookupError> {
        let result = self.resolve(code).await;
        match &result {
            Ok(profile) => debug!(user_id = %profile.user_id, "identity resolved"),
            Err(err) => warn!("identity lookup failed: {err}"),
        }
        result
    }

    #[instrument(skip(self, notice), fields(recipients = notice.recipients.len()))]
    async fn send_work_notice(&self, notice: &Notice) -> Result<(), LookupError> {
        if notice.recipients.is_empty() {
            return Ok(());
        }
        let Some(agent_id) = self.agent_id.as_deref() else {
            return Err(LookupError::Unavailable {
                detail: "no agent id configured for work notices".to_string(),
            });
        };

        let body = json!({
            "agent_id": agent_id,
            "msg": {
                "msgtype": "markdown",
                "markdown": { "title": notice.title, "text": notice.text },
            },
            "userid_list": notice.recipients.join(","),
            "to_all_user": false,
        });
        let reply = self.post_with_token(WORK_NOTICE_PATH, &body).await?;
        debug!(raw = %reply.raw, "work notice queued");
        Ok(())
    }
}
