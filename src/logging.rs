use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (for example `"info"`). Later calls are no-ops, so tests
/// and demos may call it freely.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let _ = Registry::default().with(filter).with(fmt_layer).try_init();
}
