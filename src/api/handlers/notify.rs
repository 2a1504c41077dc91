//! Work notices sent to organization members after a login is granted.

use super::state::AppState;
use crate::provider::{ContactType, Notice, UserProfile};
use tracing::{debug, warn};

pub const DEFAULT_NOTIFY_TITLE: &str = "qrsso";
const CONTACT_LINK: &str = "dingtalk://dingtalkclient/action/sendmsg?dingtalk_id=";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyConfig {
    recipients: Vec<String>,
    it_contact: Option<String>,
    title: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            it_contact: None,
            title: DEFAULT_NOTIFY_TITLE.to_string(),
        }
    }
}

impl NotifyConfig {
    /// Provider user ids told about every login. Blank entries are dropped.
    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self
    }

    /// Provider id of the IT contact linked from external contact warnings.
    /// External contact logins are only announced while this is set.
    #[must_use]
    pub fn with_it_contact(mut self, contact: Option<String>) -> Self {
        self.it_contact = contact.filter(|id| !id.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: String) -> Self {
        self.title = title;
        self
    }

    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    #[must_use]
    pub fn it_contact(&self) -> Option<&str> {
        self.it_contact.as_deref()
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Notices due for a granted login, in sending order.
pub(crate) fn login_notices(
    config: &NotifyConfig,
    profile: &UserProfile,
    ip: &str,
    user_agent: &str,
) -> Vec<Notice> {
    if config.recipients.is_empty() {
        return Vec::new();
    }
    let notice = |recipients: Vec<String>, text: String| Notice {
        recipients,
        title: config.title.clone(),
        text,
    };

    match profile.contact_type {
        ContactType::Internal => vec![notice(
            config.recipients.clone(),
            format!(
                "  Employee login notice. Name: **{}**  IP: {ip}  Mobile: {}  Device: {user_agent}",
                profile.name, profile.mobile
            ),
        )],
        ContactType::External => {
            let Some(contact) = config.it_contact.as_deref() else {
                return Vec::new();
            };
            let (follower_id, follower_name) = profile.follower.as_deref().map_or_else(
                || (profile.follower_user_id.as_str(), ""),
                |follower| (follower.user_id.as_str(), follower.name.as_str()),
            );

            let mut notices = Vec::with_capacity(2);
            if !follower_id.is_empty() {
                notices.push(notice(
                    vec![follower_id.to_string()],
                    format!(
                        "  External contact login, please check. Name: **{}**  IP: {ip}  Mobile: {}  If this looks wrong [contact IT]({CONTACT_LINK}{contact}) now",
                        profile.name, profile.mobile
                    ),
                ));
            }
            notices.push(notice(
                config.recipients.clone(),
                format!(
                    "  External contact login notice. Name: **{}**  IP: {ip}  Mobile: {}  Follower: {follower_name}  Device: {user_agent}",
                    profile.name, profile.mobile
                ),
            ));
            notices
        }
    }
}

/// Send every notice due for this login. Failures are logged, never returned.
pub(crate) async fn send_login_notices(
    state: &AppState,
    profile: &UserProfile,
    ip: &str,
    user_agent: &str,
) {
    for notice in login_notices(state.config().notify(), profile, ip, user_agent) {
        match state.identity().notify(&notice).await {
            Ok(()) => debug!(recipients = notice.recipients.len(), "login notice sent"),
            Err(err) => warn!(user_id = %profile.user_id, "Failed to send login notice: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NotifyConfig {
        NotifyConfig::default()
            .with_recipients(vec!["it-1".to_string(), " ".to_string(), "it-2".to_string()])
            .with_title("Portal".to_string())
    }

    fn internal() -> UserProfile {
        UserProfile {
            name: "Ada".to_string(),
            mobile: "13800000000".to_string(),
            user_id: "user-1".to_string(),
            ..UserProfile::default()
        }
    }

    fn external() -> UserProfile {
        UserProfile {
            contact_type: ContactType::External,
            name: "Grace".to_string(),
            mobile: "13900000000".to_string(),
            follower_user_id: "user-1".to_string(),
            follower: Some(Box::new(internal())),
            ..UserProfile::default()
        }
    }

    #[test]
    fn blank_recipients_are_dropped() {
        assert_eq!(config().recipients(), ["it-1", "it-2"]);
        assert_eq!(config().title(), "Portal");
        assert_eq!(
            NotifyConfig::default().with_it_contact(Some("  ".to_string())).it_contact(),
            None
        );
    }

    #[test]
    fn internal_login_notifies_recipients_once() {
        let notices = login_notices(&config(), &internal(), "10.0.0.1", "UA1");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].recipients, ["it-1", "it-2"]);
        assert_eq!(notices[0].title, "Portal");
        assert!(notices[0].text.contains("**Ada**"));
        assert!(notices[0].text.contains("IP: 10.0.0.1"));
        assert!(notices[0].text.contains("Device: UA1"));
    }

    #[test]
    fn nothing_is_sent_without_recipients() {
        let config = NotifyConfig::default().with_it_contact(Some("it-9".to_string()));
        assert!(login_notices(&config, &internal(), "10.0.0.1", "UA1").is_empty());
        assert!(login_notices(&config, &external(), "10.0.0.1", "UA1").is_empty());
    }

    #[test]
    fn external_login_needs_an_it_contact() {
        assert!(login_notices(&config(), &external(), "10.0.0.1", "UA1").is_empty());
    }

    #[test]
    fn external_login_warns_follower_and_recipients() {
        let config = config().with_it_contact(Some("it-9".to_string()));
        let notices = login_notices(&config, &external(), "10.0.0.1", "UA1");
        assert_eq!(notices.len(), 2);

        assert_eq!(notices[0].recipients, ["user-1"]);
        assert!(notices[0].text.contains("**Grace**"));
        assert!(notices[0]
            .text
            .contains("(dingtalk://dingtalkclient/action/sendmsg?dingtalk_id=it-9)"));

        assert_eq!(notices[1].recipients, ["it-1", "it-2"]);
        assert!(notices[1].text.contains("Follower: Ada"));
        assert!(notices[1].text.contains("Device: UA1"));
    }

    #[test]
    fn external_login_without_follower_only_tells_recipients() {
        let config = config().with_it_contact(Some("it-9".to_string()));
        let profile = UserProfile {
            follower_user_id: String::new(),
            follower: None,
            ..external()
        };
        let notices = login_notices(&config, &profile, "10.0.0.1", "UA1");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].recipients, ["it-1", "it-2"]);
    }
}
