use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,birdview=debug";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Returns false if a subscriber was already set.
pub fn init() -> bool {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    init_with(directives.as_deref())
}

/// Same as [`init`] with the filter supplied by the embedder instead of `RUST_LOG`.
pub fn init_with(directives: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(filter(directives))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

fn filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
