use tracing_subscriber::EnvFilter;

/// Initializes tracing. `-v` raises the default level to debug, `-vv`
/// to trace; `RUST_LOG` still wins when set.
pub fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
