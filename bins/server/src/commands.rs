use crate::logging::LoggingStyle;
use chrono::{DateTime, Utc};
use clap::{Arg, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const SERVE: &str = "serve";
pub const REPLAY: &str = "replay";

pub fn build_command() -> Command {
    Command::new("Upload Processor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relocates completed uploads to their primary and downstream storage tiers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("logging_style")
                .long("log")
                .env("APP_LOG_STYLE")
                .value_name("STYLE")
                .default_value("simple")
                .help("The logging style to use (simple, json)")
                .num_args(1)
                .global(true)
                .value_parser(logging_style)
                .help_heading("Logging"),
        )
        .arg(
            Arg::new("config_file")
                .long("config")
                .env("APP_CONFIG_FILE")
                .value_name("FILE")
                .help("A YAML configuration file applied on top of the defaults")
                .num_args(1)
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help_heading("Configuration"),
        )
        .subcommand(
            Command::new(SERVE)
                .about("Consumes the ingest and retry streams and serves the HTTP API")
                .arg(
                    Arg::new("bind_http")
                        .long("http")
                        .env("APP_SERVER_BIND_HTTP")
                        .value_name("SOCKET")
                        .default_value("127.0.0.1:8080")
                        .help("The socket to bind insecure HTTP on")
                        .num_args(1..)
                        .allow_negative_numbers(false)
                        .action(clap::ArgAction::Append)
                        .value_parser(socket_addr)
                        .help_heading("Server"),
                ),
        )
        .subcommand(
            Command::new(REPLAY)
                .about("Moves parked events from the replay stream back to the retry stream")
                .long_about(
                    "Moves parked events from the replay stream back to the retry stream.\n\n\
                     File streams have a single consumer: while the service is running, \
                     use POST /replay instead.",
                )
                .arg(
                    Arg::new("until")
                        .long("until")
                        .value_name("RFC3339")
                        .help("Only replays events enqueued at or before this instant")
                        .num_args(1)
                        .value_parser(timestamp),
                ),
        )
}

fn logging_style(s: &str) -> Result<LoggingStyle, String> {
    match s {
        "simple" => Ok(LoggingStyle::Compact),
        "compact" => Ok(LoggingStyle::Compact),
        "json" => Ok(LoggingStyle::Json),
        _ => Err(String::from("Either simple or json must be specified")),
    }
}

fn socket_addr(s: &str) -> Result<SocketAddr, String> {
    SocketAddr::from_str(s).map_err(|e| format!("{e}"))
}

fn timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{e}"))
}
