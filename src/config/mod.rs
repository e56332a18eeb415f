//! Monitor Configuration Module
//!
//! Provides deployment configuration loaded from TOML files: threshold
//! bands, fusion timing, dispatch policy, and per-subject enrollment
//! (contacts, geofences, medication schedules, threshold overrides).
//!
//! ## Loading Order
//!
//! 1. `VIGIL_CONFIG` environment variable (path to TOML file)
//! 2. `monitor_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(MonitorConfig::load());
//!
//! // Anywhere in the codebase:
//! let window = config::get().fusion.correlation_window_ms;
//! ```

mod monitor_config;

pub use monitor_config::*;

use std::sync::OnceLock;

/// Global monitor configuration, initialized once at startup.
static MONITOR_CONFIG: OnceLock<MonitorConfig> = OnceLock::new();

/// Initialize the global monitor configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: MonitorConfig) {
    if MONITOR_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global monitor configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static MonitorConfig {
    MONITOR_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    MONITOR_CONFIG.get().is_some()
}
