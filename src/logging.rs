use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Level comes from `RUST_LOG`
/// when set, otherwise `info`. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
