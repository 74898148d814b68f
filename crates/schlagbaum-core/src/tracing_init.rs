//! Logging setup shared by the server and client binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive enabling `level` for our own crates only.
///
/// `default_directive("schlagbaum_server", "debug")` yields
/// `"schlagbaum_server=debug,schlagbaum_core=debug"`.
pub fn default_directive(binary_crate: &str, level: &str) -> String {
    format!("{binary_crate}={level},schlagbaum_core={level}")
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. With `log_json` every
/// event is one JSON object per line.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names_both_crates() {
        assert_eq!(
            default_directive("schlagbaum_client", "warn"),
            "schlagbaum_client=warn,schlagbaum_core=warn"
        );
    }
}
