use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

use crate::cas::{DEFAULT_LOGOUT_PATH, DEFAULT_PGT_CALLBACK_PATH};

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

    Command::new("casgate")
        .about("CAS single sign-on client middleware")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CASGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("server-url")
                .short('s')
                .long("server-url")
                .help("CAS server base URL, example: https://cas.example.com/cas")
                .env("CASGATE_SERVER_URL")
                .required(true),
        )
        .arg(
            Arg::new("gateway")
                .long("gateway")
                .help("Enable gateway mode: silently check for an existing CAS session")
                .env("CASGATE_GATEWAY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("proxy-service-url")
                .long("proxy-service-url")
                .help("Service URL presented to the proxy endpoint; enables the proxy-ticket exchange")
                .env("CASGATE_PROXY_SERVICE_URL"),
        )
        .arg(
            Arg::new("exclude-path")
                .long("exclude-path")
                .help("Path prefix that bypasses CAS; prefix with 'regex:' to match a pattern (repeatable)")
                .env("CASGATE_EXCLUDE_PATH")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("extra-attribute")
                .long("extra-attribute")
                .help("Attribute name to keep from the validation response (repeatable; default keeps all)")
                .env("CASGATE_EXTRA_ATTRIBUTE")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("logout-path")
                .long("logout-path")
                .help("Application path that triggers the CAS logout flow")
                .default_value(DEFAULT_LOGOUT_PATH)
                .env("CASGATE_LOGOUT_PATH"),
        )
        .arg(
            Arg::new("pgt-callback-path")
                .long("pgt-callback-path")
                .help("Path of the proxy-granting-ticket callback endpoint")
                .default_value(DEFAULT_PGT_CALLBACK_PATH)
                .env("CASGATE_PGT_CALLBACK_PATH"),
        )
        .arg(
            Arg::new("gateway-skip-user-agent")
                .long("gateway-skip-user-agent")
                .help("User-agent substring that skips the gateway redirect (repeatable; replaces the built-in crawler list)")
                .env("CASGATE_GATEWAY_SKIP_USER_AGENT")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CASGATE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
