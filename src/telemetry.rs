//! Logging setup for the binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,hermitage_scrape={level},scrape={level},serve={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
