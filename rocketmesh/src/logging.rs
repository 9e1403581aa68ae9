//! Tracing setup for applications and demos built on rocketmesh.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives that replace the default
/// passed to [`init`], e.g. `rocketmesh=debug,info`
pub const LOG_LEVEL_ENV: &str = "ROCKETMESH_LOG";

/// Install a fmt subscriber filtered by `ROCKETMESH_LOG`, or by
/// `default_level` when the variable is unset or invalid.
///
/// Returns `false` when a global subscriber was already installed, so tests
/// and libraries may call this more than once.
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_filter_without_env() {
        temp_env::with_var_unset(LOG_LEVEL_ENV, || {
            assert_eq!(filter("warn").to_string(), "warn");
        });
    }

    #[test]
    #[serial]
    fn test_env_directives_override_default() {
        temp_env::with_var(LOG_LEVEL_ENV, Some("rocketmesh=debug"), || {
            assert_eq!(filter("info").to_string(), "rocketmesh=debug");
        });
    }

    #[test]
    #[serial]
    fn test_init_is_repeatable() {
        init("debug");
        assert!(!init("info"));
    }
}
