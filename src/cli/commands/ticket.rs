use crate::{api::handlers::state::DEFAULT_TICKET_MAX_TTL_SECONDS, sso::ticket::MAX_TICKET_TTL};
use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_DOMAIN: &str = "domain";
pub const ARG_TICKET_SECRET: &str = "ticket-secret";
pub const ARG_TICKET_MAX_TTL: &str = "ticket-max-ttl";
pub const ARG_ALLOW_TICKET_RENEW: &str = "allow-ticket-renew";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

#[derive(Debug, Clone)]
pub struct Options {
    pub domain: String,
    pub secret: SecretString,
    pub max_ttl: u32,
    pub allow_renew: bool,
    pub trusted_proxies: Vec<String>,
}

impl Options {
    /// Parse ticket and session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the domain is not an http(s) URL or the secret is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let domain = matches
            .get_one::<String>(ARG_DOMAIN)
            .cloned()
            .context("missing required argument: --domain")?;
        let parsed = Url::parse(&domain).with_context(|| format!("invalid --{ARG_DOMAIN}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("--{ARG_DOMAIN} must be an http or https URL");
        }

        let secret = match matches.get_one::<String>(ARG_TICKET_SECRET) {
            Some(secret) if !secret.trim().is_empty() => SecretString::from(secret.clone()),
            _ => bail!("missing required argument: --{ARG_TICKET_SECRET}"),
        };

        let trusted_proxies = matches
            .get_many::<String>(ARG_TRUSTED_PROXIES)
            .map(|proxies| {
                proxies
                    .map(|proxy| proxy.trim().to_string())
                    .filter(|proxy| !proxy.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            domain,
            secret,
            max_ttl: matches
                .get_one::<u32>(ARG_TICKET_MAX_TTL)
                .copied()
                .unwrap_or(DEFAULT_TICKET_MAX_TTL_SECONDS),
            allow_renew: matches.get_flag(ARG_ALLOW_TICKET_RENEW),
            trusted_proxies,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DOMAIN)
                .long(ARG_DOMAIN)
                .help("Public base URL of this service, the provider redirects to <domain>/scan/callback")
                .env("QRSSO_DOMAIN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TICKET_SECRET)
                .long(ARG_TICKET_SECRET)
                .help("HMAC key used to sign tickets")
                .env("QRSSO_TICKET_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TICKET_MAX_TTL)
                .long(ARG_TICKET_MAX_TTL)
                .help("Largest session ttl a caller may request, in seconds")
                .env("QRSSO_TICKET_MAX_TTL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u32).range(1..=i64::from(MAX_TICKET_TTL))),
        )
        .arg(
            Arg::new(ARG_ALLOW_TICKET_RENEW)
                .long(ARG_ALLOW_TICKET_RENEW)
                .help("Let backends on internal networks extend a session with renew=1")
                .env("QRSSO_ALLOW_TICKET_RENEW")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma separated proxy ips whose X-Real-IP header is honoured, 0.0.0.0 trusts every peer")
                .env("QRSSO_TRUSTED_PROXIES")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
}
