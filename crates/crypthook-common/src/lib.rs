//! Shared utilities for CryptHook: configuration, logging, error types.
//!
//! This crate provides common infrastructure used by the preload library
//! and the operator CLI.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

pub use config::{ConfigError, HookConfig, SecretSource};
pub use error::{Error, Result};

/// Environment variable holding the diagnostics filter.
pub const LOG_VAR: &str = "CRYPTHOOK_LOG";

fn diagnostics_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    EnvFilter::try_from_env(LOG_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing for a standalone binary.
///
/// Log level is controlled by `CRYPTHOOK_LOG`, then `RUST_LOG`.
/// Defaults to `info` if neither is set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(diagnostics_filter("info"))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize tracing from inside a host process.
///
/// Diagnostics go to stderr, never to the host's sockets. If the host has
/// already installed a global subscriber this is a no-op. Defaults to
/// `warn` so a healthy host process stays quiet.
pub fn init_host_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(diagnostics_filter("warn"))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
