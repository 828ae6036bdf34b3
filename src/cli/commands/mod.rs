use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("cassa")
        .about("Payment platform back-office console")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("api-url")
                .short('u')
                .long("api-url")
                .help("Base URL of the back-office admin service")
                .env("CASSA_API_URL")
                .required(true),
        )
        .arg(
            Arg::new("session-file")
                .long("session-file")
                .help("Path of the persisted session file")
                .env("CASSA_SESSION_FILE"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Request timeout in seconds")
                .default_value("10")
                .env("CASSA_TIMEOUT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CASSA_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(
            Command::new("login")
                .about("Sign in and open the back-office menu")
                .arg(
                    Arg::new("account")
                        .short('a')
                        .long("account")
                        .help("Operator account (prompted for when omitted)")
                        .env("CASSA_ACCOUNT"),
                )
                .arg(
                    Arg::new("fresh")
                        .long("fresh")
                        .help("Ignore any stored session and sign in again")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("destination")
                        .short('d')
                        .long("destination")
                        .help("Destination opened after sign-in")
                        .default_value("/")
                        .env("CASSA_DESTINATION"),
                ),
        )
        .subcommand(Command::new("logout").about("Clear the stored session"))
}
