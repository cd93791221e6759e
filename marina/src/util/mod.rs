//! Logging setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Map a `-v` count to a default filter directive.
pub fn verbosity_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

/// Filter used when `RUST_LOG` is not set.
///
/// `quiet` turns logging off entirely.
pub fn default_filter(verbosity: u8, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::new(verbosity_level(verbosity))
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the verbosity flags. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init_logging(verbosity: u8, quiet: bool) {
    let env_filter = if quiet {
        default_filter(verbosity, quiet)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbosity, quiet))
    };
    register_to_tracing(env_filter);
}

fn register_to_tracing(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(verbosity_level(0), "error");
        assert_eq!(verbosity_level(1), "warn");
        assert_eq!(verbosity_level(2), "info");
        assert_eq!(verbosity_level(3), "debug");
        assert_eq!(verbosity_level(9), "debug");
    }

    #[test]
    fn test_quiet_filter() {
        assert_eq!(default_filter(3, true).to_string(), "off");
        assert_eq!(default_filter(2, false).to_string(), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(0, true);
        init_logging(3, false);
    }
}
