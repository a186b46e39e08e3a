use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of echo requests per one-shot call
pub const DEFAULT_COUNT: u32 = 4;
/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default interval between requests
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
/// Default echo payload size (standard ping)
pub const DEFAULT_PAYLOAD: usize = 56;

/// Runtime configuration for an [`IcmpStack`](crate::ping::engine::IcmpStack).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Per-request timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Interval between echo requests
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Echo payload size in bytes
    pub payload_size: usize,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            payload_size: DEFAULT_PAYLOAD,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
