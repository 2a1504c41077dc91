use anyhow::bail;
use clap::{Arg, ArgMatches, Command};

pub const ARG_TWO_FACTOR: &str = "two-factor";
pub const ARG_TWO_FACTOR_URL: &str = "two-factor-url";
pub const ARG_BLOCK_SECONDS: &str = "two-factor-block-seconds";
pub const ARG_TRUST_SECONDS: &str = "trust-ip-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub enabled: bool,
    pub url: Option<String>,
    pub block_seconds: i64,
    pub trust_seconds: i64,
}

impl Options {
    /// Parse second factor arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the gate is on without a verifier URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let enabled = matches
            .get_one::<String>(ARG_TWO_FACTOR)
            .is_some_and(|value| value == "on");

        let url = matches
            .get_one::<String>(ARG_TWO_FACTOR_URL)
            .cloned()
            .filter(|url| !url.trim().is_empty());
        if enabled && url.is_none() {
            bail!("missing required argument: --{ARG_TWO_FACTOR_URL} (required with --{ARG_TWO_FACTOR} on)");
        }

        Ok(Self {
            enabled,
            url,
            block_seconds: matches.get_one::<i64>(ARG_BLOCK_SECONDS).copied().unwrap_or(3600),
            trust_seconds: matches.get_one::<i64>(ARG_TRUST_SECONDS).copied().unwrap_or(86_400),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TWO_FACTOR)
                .long(ARG_TWO_FACTOR)
                .help("Ask untrusted clients for a second factor after the scan")
                .env("QRSSO_TWO_FACTOR")
                .default_value("off")
                .value_parser(["on", "off"]),
        )
        .arg(
            Arg::new(ARG_TWO_FACTOR_URL)
                .long(ARG_TWO_FACTOR_URL)
                .help("Challenge verifier URL, receives sso_step and sso_user as a form post")
                .env("QRSSO_TWO_FACTOR_URL"),
        )
        .arg(
            Arg::new(ARG_BLOCK_SECONDS)
                .long(ARG_BLOCK_SECONDS)
                .help("How long a failed challenge blocks the identity, 0 disables blocking")
                .env("QRSSO_TWO_FACTOR_BLOCK_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_TRUST_SECONDS)
                .long(ARG_TRUST_SECONDS)
                .help("How long a successful login trusts the client ip, 0 disables trust")
                .env("QRSSO_TRUST_IP_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}
