use crate::cli::{actions::Action, commands, dispatch::handler, globals::GlobalArgs, telemetry};
use anyhow::{anyhow, Result};
use std::time::Duration;

/// Start the CLI
pub fn start() -> Result<(Action, GlobalArgs)> {
    let matches = commands::new().get_matches();

    let verbosity_level = match matches.get_one::<u8>("verbosity").map_or(0, |&v| v) {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    telemetry::init(Some(verbosity_level))?;

    let action = handler(&matches)?;

    let api_url = matches
        .get_one::<String>("api-url")
        .cloned()
        .ok_or_else(|| anyhow!("missing required argument: --api-url"))?;

    let mut globals = GlobalArgs::new(api_url);

    if let Some(path) = matches.get_one::<String>("session-file") {
        globals.set_session_file(path.into());
    }

    if let Some(secs) = matches.get_one::<u64>("timeout") {
        globals.set_timeout(Duration::from_secs(*secs));
    }

    Ok((action, globals))
}
