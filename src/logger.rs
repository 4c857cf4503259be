//! Structured logging backed by `tracing`.
//!
//! Modules log with their own target (`pipeline`, `pipeline::generate_sql`,
//! `gateway::sqlite`, ...) so a filter such as
//! `RUST_LOG=querychart=info,pipeline=debug` selects stages individually.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT_LOGGING: Once = Once::new();

/// Install the global subscriber once.
///
/// `RUST_LOG` wins over `default_level`; an unparsable filter falls back to `info`.
pub fn init_logging(default_level: &str) {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        // A subscriber may already be installed by an embedding application
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init();

        tracing::debug!(target: "logger", "Structured logging initialized (default level: {})", default_level);
    });
}

/// Shorten long model or SQL text for log lines
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
