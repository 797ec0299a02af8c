//! Process runtime: tracing/logging initialization.

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber: a console layer filtered by `RUST_LOG`
/// (falling back to the configured level), plus a daily-rolling file layer
/// when a log directory is configured and writable.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},krait=debug", config.level)));

    // KRAIT_LOG_DIR wins over the config file so operators can redirect
    // logs without editing deployed configuration.
    let log_dir = std::env::var("KRAIT_LOG_DIR")
        .ok()
        .or_else(|| config.dir.clone());

    let file_writer = log_dir.as_deref().and_then(rolling_writer);
    let file_logging = file_writer.is_some();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        let file_layer = file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer.json())
            .with(file_layer)
            .init();
    } else {
        let file_layer = file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    }

    if let (true, Some(dir)) = (file_logging, log_dir) {
        info!(dir = %dir, "File logging enabled (krait.log, daily rotation)");
    }
}

/// Build the non-blocking rolling writer, or `None` when the directory is
/// unusable. `tracing_appender::rolling::daily` panics (and under our
/// release profile, aborts) on an unwritable path, so probe first.
fn rolling_writer(dir: &str) -> Option<tracing_appender::non_blocking::NonBlocking> {
    if std::fs::create_dir_all(dir).is_err() {
        eprintln!("Warning: cannot create log directory {dir}, file logging disabled");
        return None;
    }

    let probe = std::path::Path::new(dir).join(".krait_write_probe");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
        }
        Err(e) => {
            eprintln!("Warning: log directory {dir} not writable ({e}), file logging disabled");
            return None;
        }
    }

    let appender = tracing_appender::rolling::daily(dir, "krait.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // The guard must outlive the process for buffered lines to reach disk.
    Box::leak(Box::new(guard));
    Some(writer)
}

/// Minimal logging for one-shot CLI commands.
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
