//! Server configuration loaded from the environment at startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Comma-separated CORS origin allowlist.
    pub allowed_origins: String,
    /// When absent the server falls back to the in-memory store.
    pub database_url: Option<String>,
    /// Base URL of the external analysis pipeline service. When absent the
    /// analyze endpoint reports 503.
    pub analysis_engine_url: Option<String>,
    /// How often the pending-transaction sweeper runs.
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let sweep_interval_secs: u64 = match std::env::var("SWEEP_INTERVAL_SECS") {
            Ok(v) => v
                .parse()
                .map_err(|_| anyhow::anyhow!("SWEEP_INTERVAL_SECS must be an integer"))?,
            Err(_) => 60,
        };

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            analysis_engine_url: std::env::var("ANALYSIS_ENGINE_URL").ok(),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
        })
    }
}
