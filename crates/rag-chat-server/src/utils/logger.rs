use anyhow::Result;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` drives the filter, `LOG_FORMAT=json` switches stdout to JSON
/// lines, and `LOG_DIR` (when set) adds a daily rolling file.
pub fn init_logger() -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,rag_chat_server=debug".to_string());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_new(&log_level)?;

    let file_layer = match std::env::var("LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("rag-chat")
                .filename_suffix("log")
                .build(dir)?;

            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false) // No colors in file
                    .boxed(),
            )
        }
        _ => None,
    };

    let stdout_layer = match log_format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
