//! Identity provider: resolves an authorization code into a [`UserProfile`].

pub mod dingtalk;

pub use dingtalk::DingTalkLookup;

use crate::sso::ticket::Fingerprint;
use serde::{Deserialize, Serialize};
use std::{future::Future, pin::Pin};

/// Whether the account belongs to the organization or is an external contact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ContactType {
    #[default]
    Internal,
    External,
}

impl From<ContactType> for u8 {
    fn from(contact_type: ContactType) -> Self {
        match contact_type {
            ContactType::Internal => 0,
            ContactType::External => 1,
        }
    }
}

impl TryFrom<u8> for ContactType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::External),
            other => Err(format!("unknown contact type {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeptInfo {
    #[serde(rename = "sso_dept_id")]
    pub id: String,
    #[serde(rename = "sso_dept_name")]
    pub name: String,
    /// `"1"` when the user manages the department, `"0"` otherwise.
    #[serde(rename = "sso_is_dept_owner")]
    pub is_owner: String,
}

/// Raw provider responses, kept for troubleshooting on the backend side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRaw {
    pub user_info: String,
    pub user_union: String,
    pub user: String,
    #[serde(rename = "department_arr")]
    pub departments: Vec<String>,
    pub external_contact_info: String,
}

/// Identity handed to business backends when they redeem a ticket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "sso_name")]
    pub name: String,
    #[serde(rename = "sso_contact_type")]
    pub contact_type: ContactType,
    #[serde(rename = "sso_mobile")]
    pub mobile: String,
    #[serde(rename = "sso_user_dept_info")]
    pub departments: Vec<DeptInfo>,
    #[serde(rename = "sso_avatar")]
    pub avatar: String,
    #[serde(rename = "sso_job_title")]
    pub job_title: String,
    #[serde(rename = "sso_state_code")]
    pub state_code: String,
    #[serde(rename = "sso_company_name")]
    pub company_name: String,
    #[serde(rename = "sso_email")]
    pub email: String,
    #[serde(rename = "sso_follower_user_id")]
    pub follower_user_id: String,
    /// Internal owner of an external contact.
    #[serde(rename = "sso_follower_user")]
    pub follower: Option<Box<UserProfile>>,
    #[serde(rename = "sso_address")]
    pub address: String,
    #[serde(rename = "sso_remark")]
    pub remark: String,
    #[serde(rename = "sso_dingding_union_id")]
    pub union_id: String,
    #[serde(rename = "sso_dingding_user_id")]
    pub user_id: String,
    #[serde(rename = "sso_dingding_open_id")]
    pub open_id: String,
    #[serde(rename = "sso_dingding_nick_name")]
    pub nick_name: String,
    #[serde(rename = "sso_ticket")]
    pub ticket: String,
    #[serde(rename = "dingding_raw")]
    pub provider_raw: ProviderRaw,
}

impl UserProfile {
    /// Key used to block this identity after a failed second factor.
    #[must_use]
    pub fn block_key(&self) -> &str {
        if self.open_id.is_empty() {
            &self.user_id
        } else {
            &self.open_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The provider could not be reached or answered with something unreadable.
    #[error("identity provider unavailable: {detail}")]
    Unavailable { detail: String },
    /// The provider answered with an error code, or without a field we need.
    #[error("identity provider error {errcode:?}")]
    Api { errcode: Option<i64>, raw: String },
    #[error("account is not a member of the organization")]
    NotMember { raw: String },
    #[error("account is inactive")]
    Inactive,
}

impl LookupError {
    /// Short code reported to the popup window.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "err:1",
            Self::NotMember { .. } => "err:3",
            Self::Api { .. } => "err:4",
            Self::Inactive => "err:12",
        }
    }
}

pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<UserProfile, LookupError>> + Send + 'a>>;
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), LookupError>> + Send + 'a>>;

/// Markdown work notice for organization members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Provider user ids.
    pub recipients: Vec<String>,
    pub title: String,
    pub text: String,
}

pub trait IdentityLookup: Send + Sync {
    fn lookup<'a>(&'a self, code: &'a str, fingerprint: Fingerprint<'a>) -> LookupFuture<'a>;

    /// Deliver `notice`. Providers without messaging accept and drop it.
    fn notify<'a>(&'a self, notice: &'a Notice) -> NotifyFuture<'a> {
        let _ = notice;
        Box::pin(async { Ok(()) })
    }
}
