use std::time::Duration;

use c2w_shm::layout::{DEFAULT_CONTROL_DATA_BYTES, DEFAULT_RING_REGION_BYTES};

use crate::error::ConfigError;

/// Whole ring region size, header words included. The data area is smaller by 16 bytes for the
/// to-guest ring and 12 for the from-guest ring.
pub const ENV_RING_REGION_BYTES: &str = "C2W_RING_REGION_BYTES";
pub const ENV_CONTROL_CAPACITY: &str = "C2W_CONTROL_CAPACITY";
pub const ENV_POLL_INTERVAL_MS: &str = "C2W_POLL_INTERVAL_MS";
pub const ENV_MAX_CONNECTIONS: &str = "C2W_MAX_CONNECTIONS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sizes and timings for one transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Size of each ring region in bytes, header included.
    pub ring_region_bytes: usize,
    /// Size of the control region's `data` area.
    pub control_capacity: usize,
    /// Interval at which a pending readiness poll re-checks the ring.
    pub poll_interval: Duration,
    /// Upper bound on live HTTP/layer records. `0` means unbounded.
    pub max_connections: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ring_region_bytes: DEFAULT_RING_REGION_BYTES,
            control_capacity: DEFAULT_CONTROL_DATA_BYTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_connections: 0,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ring_region_bytes =
            parse_var(&lookup, ENV_RING_REGION_BYTES)?.unwrap_or(defaults.ring_region_bytes);
        let control_capacity =
            parse_var(&lookup, ENV_CONTROL_CAPACITY)?.unwrap_or(defaults.control_capacity);
        let poll_interval = parse_var::<u64>(&lookup, ENV_POLL_INTERVAL_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_connections =
            parse_var(&lookup, ENV_MAX_CONNECTIONS)?.unwrap_or(defaults.max_connections);

        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidEnv {
                var: ENV_POLL_INTERVAL_MS,
                value: "0".to_string(),
            });
        }

        Ok(Self {
            ring_region_bytes,
            control_capacity,
            poll_interval,
            max_connections,
        })
    }
}

/// Parse an optional numeric variable. Present-but-unparseable values are an error rather than
/// silently falling back to the default.
pub fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
