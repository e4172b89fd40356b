//! Structured logging setup.

use crate::config::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "DOCTRINE_LOG";

/// Initializes the global tracing subscriber.
///
/// The filter comes from the config `filter`, then the `DOCTRINE_LOG`
/// environment variable, then `info`. Output is pretty by default and
/// JSON when configured. Logs go to stderr so stdout stays clean for
/// tool responses.
pub fn init(settings: &LoggingSettings) {
    let filter = settings.filter.clone().map_or_else(
        || EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        EnvFilter::new,
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if settings.format.as_deref() == Some("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = result {
        // A second init in tests is harmless.
        tracing::debug!("logging already initialized: {err}");
    }
}
