use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Install the global tracing subscriber: fmt output, filtered by `RUST_LOG`
/// when set, otherwise by the caller's fallback filter.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
