use std::env;
use std::time::Duration;

/// Timeouts governing the session state machine. Tests shrink these to
/// milliseconds; the defaults suit a real network.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on opening the signaling channel after entering a search;
    /// exceeding it engages the fallback simulator
    pub signal_open_timeout: Duration,
    /// Bound on media-handshake progress in PlacingCall/AwaitingCall;
    /// exceeding it counts as partner lost and re-enters the search
    pub handshake_timeout: Duration,
    /// How long the fallback simulator pretends to search before producing
    /// its synthetic match
    pub fallback_match_delay: Duration,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            signal_open_timeout: secs_env("DRIFT_SIGNAL_OPEN_TIMEOUT")
                .unwrap_or(defaults.signal_open_timeout),
            handshake_timeout: secs_env("DRIFT_HANDSHAKE_TIMEOUT")
                .unwrap_or(defaults.handshake_timeout),
            fallback_match_delay: secs_env("DRIFT_FALLBACK_MATCH_DELAY")
                .unwrap_or(defaults.fallback_match_delay),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signal_open_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(15),
            fallback_match_delay: Duration::from_secs(1),
        }
    }
}

fn secs_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}
