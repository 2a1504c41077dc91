use crate::{
    api::{self, handlers::state::{AppState, SsoConfig}},
    challenge::{ChallengeVerifier, HttpChallengeVerifier},
    cli::commands::{gate, notify, provider, ticket},
    provider::dingtalk::DingTalkLookup,
    sso::{GateConfig, SystemClock},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub ticket: ticket::Options,
    pub gate: gate::Options,
    pub provider: provider::Options,
    pub notify: notify::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, a collaborator client
/// cannot be built, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let Args {
        port,
        ticket,
        gate,
        provider,
        notify,
    } = args;

    let config = SsoConfig::new(ticket.domain)
        .with_ticket_max_ttl(ticket.max_ttl)
        .with_allow_ticket_renew(ticket.allow_renew)
        .with_trusted_proxies(ticket.trusted_proxies)
        .with_provider(provider.url.clone(), provider.app_key.clone())
        .with_notify(notify.config);

    let gate_config = GateConfig::new()
        .with_enabled(gate.enabled)
        .with_block_seconds(gate.block_seconds)
        .with_trust_seconds(gate.trust_seconds);

    let mut identity = DingTalkLookup::new(
        &provider.url,
        provider.app_key,
        provider.app_secret,
        provider.timeout,
    )?;
    if let Some(agent_id) = notify.agent_id {
        identity = identity.with_agent_id(agent_id);
    }

    let verifier = match gate.url.as_deref() {
        Some(url) => Some(
            Arc::new(HttpChallengeVerifier::new(url, provider.timeout)?)
                as Arc<dyn ChallengeVerifier>,
        ),
        None => None,
    };

    let state = AppState::new(
        config,
        ticket.secret,
        gate_config,
        Arc::new(identity),
        verifier,
        Arc::new(SystemClock),
    )?;

    api::new(port, Arc::new(state)).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("domain", args.ticket.domain.clone()),
        ("ticket_secret", "REDACTED".to_string()),
        ("ticket_max_ttl", format!("{}s", args.ticket.max_ttl)),
        ("allow_ticket_renew", args.ticket.allow_renew.to_string()),
        ("trusted_proxies", join_or_none(&args.ticket.trusted_proxies)),
        ("two_factor", on_off(args.gate.enabled).to_string()),
        (
            "two_factor_url",
            args.gate.url.clone().unwrap_or_else(|| "none".to_string()),
        ),
        ("block_seconds", args.gate.block_seconds.to_string()),
        ("trust_ip_seconds", args.gate.trust_seconds.to_string()),
        ("provider_url", args.provider.url.clone()),
        ("provider_app_key", args.provider.app_key.clone()),
        (
            "collaborator_timeout",
            args.provider
                .timeout
                .map_or_else(|| "none".to_string(), |t| format!("{}s", t.as_secs())),
        ),
        (
            "notify_user_ids",
            join_or_none(args.notify.config.recipients()),
        ),
        (
            "notify_contact_id",
            args.notify.config.it_contact().unwrap_or("none").to_string(),
        ),
        ("notify_title", args.notify.config.title().to_string()),
        (
            "notify_agent_id",
            args.notify.agent_id.clone().unwrap_or_else(|| "none".to_string()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.join(",")
    }
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    BANNER.replace(
        "{VERSION}",
        &format!(
            " - {} - {}",
            env!("CARGO_PKG_VERSION"),
            short_commit(crate::GIT_COMMIT_HASH)
        ),
    )
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}

const BANNER: &str = r"
  ▄▄▄ ▄▄▄▄
 █ ▄▄ █ ▄▄█   Q R S S O {VERSION}
 █ ▀▀ █ ▀▀█
  ▀▀▀ ▀▀▀▀";
