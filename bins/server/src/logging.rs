use clap::ArgMatches;
use std::borrow::Borrow;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Directives applied when `RUST_LOG` is unset. The pipeline logs at `info`;
/// the HTTP stack only reports warnings.
const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,axum=warn,tower=warn";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoggingStyle {
    /// One line per event with key-value fields.
    Compact,
    /// One JSON object per event, fields flattened into it.
    Json,
}

/// Initializes logging with the style selected by `--log`.
pub fn initialize_from_matches<M: Borrow<ArgMatches>>(matches: M) {
    let style = matches
        .borrow()
        .get_one::<LoggingStyle>("logging_style")
        .copied()
        .unwrap_or(LoggingStyle::Compact);
    initialize(style)
}

/// Installs the global subscriber.
///
/// Upload events carry `upload_id`, `stage`, `target` and `attempt` fields;
/// consumer loops add the `stream` and `offset` they work on.
pub fn initialize<S: Borrow<LoggingStyle>>(style: S) {
    let formatter = tracing_subscriber::fmt()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(true)
        .with_target(true)
        .with_env_filter(env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()));

    match style.borrow() {
        LoggingStyle::Compact => formatter.compact().init(),
        LoggingStyle::Json => formatter.json().flatten_event(true).init(),
    }
}

/// Builds the filter from `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`].
/// Invalid directives are skipped.
fn env_filter(directives: Option<String>) -> EnvFilter {
    let directives = directives
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string());

    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}
