//! Structured logging setup.
//!
//! `RUST_LOG` takes precedence over the configured level. JSON output emits
//! one object per line:
//!
//! ```json
//! {"timestamp":"...","level":"DEBUG","target":"fgacheck_domain::resolver","fields":{"message":"cycle detected"}}
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Builds the level filter for `settings`, preferring `RUST_LOG` when set.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter = env_filter(settings);

    if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok()
    }
}

/// A JSON subscriber writing to `writer`, for capturing logs in tests.
pub fn json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
