// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `EXMAKE_DEBUG=1` forces `debug`
//! 2. `--loud` raises the level to `info` (recipes and commands are logged)
//! 3. default to `warn`
//!
//! `EXMAKE_COLORS=0` disables ANSI color output.

use tracing_subscriber::fmt;

use crate::errors::Result;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(loud: bool) -> Result<()> {
    let level = if debug_enabled() {
        tracing::Level::DEBUG
    } else if loud {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(colors_enabled())
        .init();

    Ok(())
}

/// Whether `EXMAKE_DEBUG=1` asked for debug-level diagnostics.
pub fn debug_enabled() -> bool {
    std::env::var("EXMAKE_DEBUG").is_ok_and(|v| v == "1")
}

fn colors_enabled() -> bool {
    std::env::var("EXMAKE_COLORS").map(|v| v != "0").unwrap_or(true)
}
