use std::fs;

use tracing_appender::rolling;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{AppConfig, DEFAULT_LOG_LEVEL};

/// Filter from `RUST_LOG` when set, otherwise the configured level.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Run `f` with a temporary stderr subscriber at the default level.
///
/// Covers work done before [`init`] can run, such as loading the config
/// that decides where logs go.
pub fn bootstrap<T>(f: impl FnOnce() -> T) -> T {
    scoped(std::io::stderr, f)
}

fn scoped<W, T>(writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = fmt()
        .with_writer(writer)
        .with_target(false)
        .with_env_filter(filter(DEFAULT_LOG_LEVEL))
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `log.directory` is configured. Call once near the start of `main`;
/// later calls are ignored.
pub fn init(config: &AppConfig) {
    let level = config.log_level();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter(level));

    let file_layer = config.log_directory().and_then(|dir| {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        Some(
            fmt::layer()
                .with_writer(rolling::daily(dir, "fpick.log"))
                .with_ansi(false)
                .with_filter(filter(level)),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
