use tracing_subscriber::EnvFilter;

/// Initialize structured logging for a guest component.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to the provided
/// level. Events go to stderr, which the host captures. Only the first call
/// installs a subscriber.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
