//! Application configuration loaded from environment variables.

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — PostgreSQL connection string (unset runs the
///   in-memory store)
/// - `PENDING_TTL_SECS` — how long unpaid registrations live
///   (default: `1800`)
/// - `SWEEP_INTERVAL_SECS` — expiry sweeper period (default: `60`)
/// - `PROMOTION_POLL_SECS` — promotion worker fallback poll period
///   (default: `30`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub pending_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub promotion_poll_secs: u64,
    pub log_level: String,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            pending_ttl_secs: env_u64("PENDING_TTL_SECS", 1800),
            sweep_interval_secs: env_u64("SWEEP_INTERVAL_SECS", 60),
            promotion_poll_secs: env_u64("PROMOTION_POLL_SECS", 30),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            pending_ttl_secs: 1800,
            sweep_interval_secs: 60,
            promotion_poll_secs: 30,
            log_level: "info".to_string(),
        }
    }
}
