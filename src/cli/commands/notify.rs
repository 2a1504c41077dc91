use crate::api::handlers::notify::{NotifyConfig, DEFAULT_NOTIFY_TITLE};
use anyhow::bail;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_NOTIFY_USER_IDS: &str = "notify-user-ids";
pub const ARG_NOTIFY_CONTACT_ID: &str = "notify-contact-id";
pub const ARG_NOTIFY_TITLE: &str = "notify-title";
pub const ARG_NOTIFY_AGENT_ID: &str = "notify-agent-id";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: NotifyConfig,
    /// Provider microapp the notices are sent as.
    pub agent_id: Option<String>,
}

impl Options {
    /// Parse login notice arguments from matches.
    ///
    /// # Errors
    /// Returns an error if recipients are set without an agent id.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let recipients: Vec<String> = matches
            .get_many::<String>(ARG_NOTIFY_USER_IDS)
            .map(|ids| ids.cloned().collect())
            .unwrap_or_default();

        let config = NotifyConfig::default()
            .with_recipients(recipients)
            .with_it_contact(get_non_empty(ARG_NOTIFY_CONTACT_ID))
            .with_title(
                get_non_empty(ARG_NOTIFY_TITLE).unwrap_or_else(|| DEFAULT_NOTIFY_TITLE.to_string()),
            );

        let agent_id = get_non_empty(ARG_NOTIFY_AGENT_ID);
        if !config.recipients().is_empty() && agent_id.is_none() {
            bail!("--{ARG_NOTIFY_USER_IDS} requires --{ARG_NOTIFY_AGENT_ID}");
        }

        Ok(Self { config, agent_id })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_NOTIFY_USER_IDS)
                .long(ARG_NOTIFY_USER_IDS)
                .help("Comma separated provider user ids told about every granted login")
                .env("QRSSO_NOTIFY_USER_IDS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_NOTIFY_CONTACT_ID)
                .long(ARG_NOTIFY_CONTACT_ID)
                .help("Provider id of the IT contact, enables notices for external contact logins")
                .env("QRSSO_NOTIFY_CONTACT_ID"),
        )
        .arg(
            Arg::new(ARG_NOTIFY_TITLE)
                .long(ARG_NOTIFY_TITLE)
                .help("Title of login notices")
                .env("QRSSO_NOTIFY_TITLE")
                .default_value(DEFAULT_NOTIFY_TITLE),
        )
        .arg(
            Arg::new(ARG_NOTIFY_AGENT_ID)
                .long(ARG_NOTIFY_AGENT_ID)
                .help("Provider microapp agent id used to send login notices")
                .env("QRSSO_NOTIFY_AGENT_ID"),
        )
}
