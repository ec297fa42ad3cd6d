//! Tracing setup for the `reclaim` binary.
//!
//! Log lines go to stderr; stdout is reserved for reports and JSON output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const RECLAIM_TARGETS: [&str; 3] = ["reclaim", "reclaim_core", "reclaim_pipeline"];

/// Default filter: `level` for reclaim's own targets, warnings for everything else.
fn default_directives(level: Level) -> String {
    let mut directives = String::from("warn");
    for target in RECLAIM_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Install the global subscriber. `RUST_LOG` replaces the default filter.
///
/// Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let layer = if json { layer.json().boxed() } else { layer.boxed() };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_reclaim_targets() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("reclaim_pipeline=DEBUG"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::warn!("still alive");
    }
}
