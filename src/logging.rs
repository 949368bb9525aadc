//! Logging setup.
//!
//! Loader batching is easiest to debug by watching which ticks dispatch which
//! SQL; every dispatch and loader-cache decision is logged at debug level
//! through `tracing`. This module wires an optional subscriber controlled by
//! environment variables:
//!
//! - `ROWBATCH_DEBUG=true|1|yes` - enable debug logging
//! - `ROWBATCH_LOG_LEVEL=trace|debug|info|warn|error` - set a specific level
//! - `ROWBATCH_LOG_FORMAT=json|pretty|compact` - set output format (default: json)
//!
//! Applications that already install their own subscriber should skip
//! [`init`] entirely; the crate only ever emits events.
//!
//! ```rust,no_run
//! use rowbatch::logging;
//!
//! // Call once at startup.
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via the `ROWBATCH_DEBUG` environment
/// variable.
///
/// Returns `true` if `ROWBATCH_DEBUG` is set to "true", "1", or "yes"
/// (case-insensitive).
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("ROWBATCH_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Get the configured log level from `ROWBATCH_LOG_LEVEL`.
///
/// Defaults to "debug" if `ROWBATCH_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    if let Ok(level) = env::var("ROWBATCH_LOG_LEVEL") {
        match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => {
                if is_debug_enabled() {
                    "debug"
                } else {
                    "warn"
                }
            }
        }
    } else if is_debug_enabled() {
        "debug"
    } else {
        "warn"
    }
}

/// Get the configured log format from `ROWBATCH_LOG_FORMAT`.
///
/// Defaults to "json" for structured logging.
pub fn get_log_format() -> &'static str {
    env::var("ROWBATCH_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize the logging subscriber.
///
/// Call once at application startup; subsequent calls are no-ops. Does
/// nothing unless `ROWBATCH_DEBUG` or `ROWBATCH_LOG_LEVEL` is set, and
/// nothing without the `tracing-subscriber` feature.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("ROWBATCH_LOG_LEVEL").is_err() {
            // No logging requested, skip initialization
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!("rowbatch={}", level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            match get_log_format() {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "compact" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().compact())
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().pretty())
                        .init();
                }
            }

            tracing::info!(
                level = level,
                format = get_log_format(),
                "rowbatch logging initialized"
            );
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        {
            // Without the feature the caller's subscriber (if any) receives
            // the events.
        }
    });
}

/// Initialize logging with a specific level.
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call this early in your program before
/// spawning threads.
pub fn init_with_level(level: &str) {
    // SAFETY: This should only be called at program startup before threads are spawned.
    // The user is responsible for calling this safely.
    unsafe {
        env::set_var("ROWBATCH_LOG_LEVEL", level);
    }
    init();
}

/// Initialize debug logging (convenience for `ROWBATCH_DEBUG=true`).
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call this early in your program before
/// spawning threads.
pub fn init_debug() {
    // SAFETY: This should only be called at program startup before threads are spawned.
    unsafe {
        env::set_var("ROWBATCH_DEBUG", "true");
    }
    init();
}
