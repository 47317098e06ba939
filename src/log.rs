//! Structured logging for taskweave.
//!
//! Log levels:
//! - ERROR: tasks that exhausted their retries, critical-failure stops
//! - WARN: retries, unresolved conflicts, forced single-task batches
//! - INFO: plan and batch lifecycle
//! - DEBUG: planning decisions (conflicts, injected edges, packing)
//!
//! Debug mode can be enabled with `--debug` flag or `TASKWEAVE_DEBUG=1` env
//! var. `RUST_LOG` overrides the default filter entirely.

use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Env var that turns on debug logging.
pub const DEBUG_ENV: &str = "TASKWEAVE_DEBUG";

/// Initialize logging to ~/.taskweave/taskweave.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// The log file is truncated on start-up. Without a home directory, logs
/// go to stderr. Calling this twice is harmless: the second call keeps the
/// first subscriber.
pub fn init_with_debug(debug: bool) {
    let level = if debug || env_debug() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("taskweave={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let file = Config::log_path().ok().and_then(|path| {
        std::fs::create_dir_all(path.parent()?).ok()?;
        File::create(&path).ok()
    });

    let result = match file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// Check whether `TASKWEAVE_DEBUG` asks for debug logging.
pub fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
