//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gate, notify, provider, ticket, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    Ok(Action::Server(Args {
        port,
        ticket: ticket::Options::parse(matches)?,
        gate: gate::Options::parse(matches)?,
        provider: provider::Options::parse(matches)?,
        notify: notify::Options::parse(matches)?,
    }))
}
