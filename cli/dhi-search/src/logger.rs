use tracing_subscriber::EnvFilter;

use crate::commands::Verbosity;

/// Filter directives for a verbosity level.
fn log_filter(verbosity: Verbosity) -> &'static str {
    match verbosity {
        // Show only errors
        Verbosity::Quiet => "off,dhi_search=error,dhi_catalog=error",
        // Only show warnings
        Verbosity::Verbose(0) => "off,dhi_search=warn,dhi_catalog=warn",
        // Show our own info logs
        Verbosity::Verbose(1) => "off,dhi_search=info,dhi_catalog=info",
        Verbosity::Verbose(2) => "off,dhi_search=debug,dhi_catalog=debug",
        Verbosity::Verbose(3) => "off,dhi_search=trace,dhi_catalog=trace",
        // Also show debug from http and runtime dependencies
        Verbosity::Verbose(4) => "debug,dhi_search=trace,dhi_catalog=trace",
        Verbosity::Verbose(_) => "trace",
    }
}

/// Log to stderr, keeping stdout for results.
///
/// `RUST_LOG` takes precedence over the verbosity flags.
pub(crate) fn init_logger(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter(verbosity)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_verbosity_has_a_valid_filter() {
        let levels = [Verbosity::Quiet]
            .into_iter()
            .chain((0..=5).map(Verbosity::Verbose));
        for verbosity in levels {
            let directives = log_filter(verbosity);
            assert!(
                EnvFilter::try_new(directives).is_ok(),
                "invalid filter for {verbosity:?}: {directives}"
            );
        }
    }

    #[test]
    fn default_verbosity_shows_warnings() {
        assert_eq!(
            log_filter(Verbosity::default()),
            "off,dhi_search=warn,dhi_catalog=warn"
        );
    }
}
