//! Server configuration, read from the environment with sensible local
//! defaults -- there is no on-disk config file, since the whole point of
//! this crate is to stay a thin, embeddable core rather than grow its own
//! deployment surface.

use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow};

const BIND_ADDR_ENV: &str = "THINSERVE_BIND_ADDR";
const LONG_POLL_WARN_SECS_ENV: &str = "THINSERVE_LONG_POLL_WARN_SECS";

/// Runtime configuration for [`crate::server::serve`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind_address: SocketAddr,
    /// How long a GET long-poll may sit parked before a warning is logged.
    /// Purely diagnostic -- the shuttle itself has no timeout and will park
    /// indefinitely; see [`crate::proto::shuttle::Shuttle`].
    pub long_poll_warn: std::time::Duration,
}

impl ServerConfig {
    /// Build configuration from the environment, falling back to
    /// `127.0.0.1:8080` and a 60 second long-poll warning threshold.
    pub fn from_env() -> Result<Self> {
        let bind_address = match std::env::var(BIND_ADDR_ENV) {
            Ok(raw) if !raw.trim().is_empty() => resolve_bind_address(&raw)?,
            _ => resolve_bind_address("127.0.0.1:8080")?,
        };

        let long_poll_warn = match std::env::var(LONG_POLL_WARN_SECS_ENV) {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{LONG_POLL_WARN_SECS_ENV} must be an integer number of seconds, got {raw:?}"))?;
                std::time::Duration::from_secs(secs)
            }
            _ => std::time::Duration::from_secs(60),
        };

        Ok(Self { bind_address, long_poll_warn })
    }
}

fn resolve_bind_address(raw: &str) -> Result<SocketAddr> {
    raw.trim()
        .parse()
        .map_err(|error| anyhow!("invalid {BIND_ADDR_ENV} value {raw:?}: {error}"))
}
