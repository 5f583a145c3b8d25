use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// A channel with no ping for this long is considered dead
    pub heartbeat_timeout_seconds: u64,
    /// How often the sweeper looks for dead channels
    pub sweep_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("DRIFT_PIER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4520),
            heartbeat_timeout_seconds: env::var("DRIFT_HEARTBEAT_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(300),
            sweep_interval_seconds: env::var("DRIFT_SWEEP_INTERVAL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4520,
            heartbeat_timeout_seconds: 300,
            sweep_interval_seconds: 60,
        }
    }
}
