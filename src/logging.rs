use std::io;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONSOLE_FILTER: &str = "info,web_request=info,pipeline=info,db_query=warn,sqlx=off";
const DEFAULT_FILE_FILTER: &str = "info,web_request=debug,pipeline=debug,sqlx=info";

/// Logs to stderr (filtered by `RUST_LOG` when set) and to a daily rolling file under `logs/`.
pub fn configure_logging() {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER));

    // Console log configuration; stdout is reserved for command output
    let console_log = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    // File log configuration
    let file_appender = rolling::daily("logs", "rivalwatch.log");
    let file_log = fmt::layer()
        .with_ansi(false)
        .with_writer(file_appender)
        .with_filter(EnvFilter::new(DEFAULT_FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(console_log)
        .with(file_log)
        .init();
}
