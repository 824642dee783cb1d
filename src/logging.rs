// Logging setup for embedding applications and integration tests

use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Initialize the logging subsystem.
///
/// `RUST_LOG` overrides the level when set; otherwise `verbose` selects
/// DEBUG over INFO. Call once per process; a second call is a no-op rather
/// than an error, so tests can race it freely.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .try_init();

    if result.is_ok() && verbose {
        info!("Verbose logging enabled (DEBUG level)");
    }
}
