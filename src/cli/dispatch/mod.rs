use crate::cli::actions::Action;
use anyhow::Result;

/// Maps validated CLI matches to an action. No subcommand defaults to
/// `login`.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("logout", _)) => Ok(Action::Logout),
        Some(("login", sub)) => Ok(Action::Login {
            account: sub.get_one::<String>("account").cloned(),
            fresh: sub.get_flag("fresh"),
            destination: sub
                .get_one::<String>("destination")
                .cloned()
                .unwrap_or_else(|| "/".to_string()),
        }),
        _ => Ok(Action::Login {
            account: None,
            fresh: false,
            destination: "/".to_string(),
        }),
    }
}
