//! Tracing subscriber setup for the `samstore` binary.
//!
//! Filter priority: `SAMSTORE_LOG`, then `RUST_LOG`, then the `-v` / `-q`
//! flags. Logs always go to stderr so that reports on stdout stay clean.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const ENV_LOG: &str = "SAMSTORE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    /// Level applied to this crate's own events.
    pub const fn crate_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, first thing in `main`.
pub fn init(verbosity: Verbosity) {
    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(verbosity == Verbosity::Verbose);

    tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(fmt_layer)
        .init();
}

fn env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var(ENV_LOG)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directive = match verbosity {
        Verbosity::Quiet => "error".to_string(),
        _ => format!("warn,samstore={}", verbosity.crate_level()),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"))
}
