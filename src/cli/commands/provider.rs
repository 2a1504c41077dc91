use crate::provider::dingtalk::DEFAULT_PROVIDER_URL;
use anyhow::bail;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_PROVIDER_URL: &str = "provider-url";
pub const ARG_PROVIDER_APP_KEY: &str = "provider-app-key";
pub const ARG_PROVIDER_APP_SECRET: &str = "provider-app-secret";
pub const ARG_COLLABORATOR_TIMEOUT: &str = "collaborator-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub app_key: String,
    pub app_secret: SecretString,
    /// Applies to the identity provider and the challenge verifier.
    pub timeout: Option<Duration>,
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the app key or secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(app_key) = get_non_empty(ARG_PROVIDER_APP_KEY) else {
            bail!("missing required argument: --{ARG_PROVIDER_APP_KEY}");
        };
        let Some(app_secret) = get_non_empty(ARG_PROVIDER_APP_SECRET) else {
            bail!("missing required argument: --{ARG_PROVIDER_APP_SECRET}");
        };

        Ok(Self {
            url: get_non_empty(ARG_PROVIDER_URL).unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string()),
            app_key,
            app_secret: SecretString::from(app_secret),
            timeout: matches
                .get_one::<u64>(ARG_COLLABORATOR_TIMEOUT)
                .copied()
                .map(Duration::from_secs),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PROVIDER_URL)
                .long(ARG_PROVIDER_URL)
                .help("Identity provider API base URL")
                .env("QRSSO_PROVIDER_URL")
                .default_value(DEFAULT_PROVIDER_URL),
        )
        .arg(
            Arg::new(ARG_PROVIDER_APP_KEY)
                .long(ARG_PROVIDER_APP_KEY)
                .help("Identity provider app key, also the QR page appid")
                .env("QRSSO_PROVIDER_APP_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PROVIDER_APP_SECRET)
                .long(ARG_PROVIDER_APP_SECRET)
                .help("Identity provider app secret")
                .env("QRSSO_PROVIDER_APP_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_COLLABORATOR_TIMEOUT)
                .long(ARG_COLLABORATOR_TIMEOUT)
                .help("Request timeout for the identity provider and the challenge verifier, unset waits indefinitely")
                .env("QRSSO_COLLABORATOR_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
