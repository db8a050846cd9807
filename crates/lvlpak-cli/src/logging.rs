//! Log subscriber setup.
//!
//! `LVLPAK_LOG` takes an `EnvFilter` directive string and wins over `-v`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding filter directives
pub const LOG_ENV: &str = "LVLPAK_LOG";

/// Install the global subscriber, logging to stderr
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(verbose));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn default_filter(verbose: u8) -> EnvFilter {
    match verbose {
        // Build warnings are rendered as diagnostics
        0 => EnvFilter::new("warn,lvlpak_engine::script=error,lvlpak_engine::compiler=error"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}
