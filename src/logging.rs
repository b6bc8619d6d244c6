//! Logging initialization and the command log channels.
//!
//! Command traffic is logged on dedicated targets so it can be filtered
//! independently of the library's own diagnostics:
//!
//! | target                 | content                         |
//! |------------------------|---------------------------------|
//! | `citizen_shell::in`    | command text sent to the shell  |
//! | `citizen_shell::out`   | stdout lines                    |
//! | `citizen_shell::err`   | stderr lines                    |
//! | `citizen_shell::oob`   | connection lifecycle messages   |
//! | `citizen_shell::spy`   | untagged bytes from char streams|

use tracing::{error, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "citizen_shell=info";

fn filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    }
}

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `citizen_shell=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(filter(None))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    try_init_with(None)
}

/// Try to initialize logging with an explicit filter directive
/// (e.g. `debug` or `citizen_shell::out=info`).
pub fn try_init_with(level: Option<&str>) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}

pub(crate) fn log_stdin(line: &str) {
    info!(target: "citizen_shell::in", "$ {}", line);
}

pub(crate) fn log_stdout(line: &str) {
    info!(target: "citizen_shell::out", "{}", line);
}

pub(crate) fn log_stderr(line: &str) {
    error!(target: "citizen_shell::err", "{}", line);
}

pub(crate) fn log_oob(line: &str) {
    info!(target: "citizen_shell::oob", "> {}", line);
}

pub(crate) fn log_spy(line: &str) {
    trace!(target: "citizen_shell::spy", "{:?}", line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_idempotent() {
        // First call may or may not succeed depending on test order
        let _ = try_init();
        let _ = try_init_with(Some("debug"));
    }

    #[test]
    fn test_channels_do_not_panic() {
        let _ = try_init();

        log_stdin("echo Foo");
        log_stdout("Foo");
        log_stderr("oops");
        log_oob("connected!");
        log_spy("\u{1b}[?2004h$ ");
    }

    #[test]
    fn test_invalid_level_falls_back() {
        // An unparsable directive must not panic
        let _ = filter(Some("[[[not a directive"));
    }
}
