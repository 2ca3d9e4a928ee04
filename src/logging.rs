//! Tracing subscriber set-up for the binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "wikitrends=info,traffic_analysis=info,wiki_traffic=info";

/// Install the global subscriber; a second call is a no-op
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .try_init();
}
