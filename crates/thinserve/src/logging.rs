//! Structured logging setup, mirroring the CLI's `init_tracing` helper:
//! `RUST_LOG`-driven filtering with an `info`-level default.

use tracing::Level;

/// Install a global `tracing` subscriber. Safe to call more than once --
/// only the first call takes effect.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_max_level(Level::INFO).try_init();
}
