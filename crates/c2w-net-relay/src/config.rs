use c2w_bridge::{BridgeConfig, ConfigError};

pub const ENV_CONNECT: &str = "C2W_RELAY_CONNECT";
pub const ENV_LISTEN: &str = "C2W_RELAY_LISTEN";

const DEFAULT_LISTEN: &str = "127.0.0.1:8022";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bridge: BridgeConfig,
    /// Upstream the bridge's TCP transport connects to.
    pub connect: String,
    /// Local address the relay guest accepts clients on.
    pub listen: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bridge = BridgeConfig::from_lookup(&lookup)?;
        let connect = lookup(ENV_CONNECT)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnv(ENV_CONNECT))?;
        let listen = lookup(ENV_LISTEN).unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        Ok(Self {
            bridge,
            connect,
            listen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn connect_is_required() {
        assert_eq!(
            RelayConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingEnv(ENV_CONNECT))
        );
        assert_eq!(
            RelayConfig::from_lookup(lookup(&[(ENV_CONNECT, "  ")])),
            Err(ConfigError::MissingEnv(ENV_CONNECT))
        );
    }

    #[test]
    fn bridge_settings_are_read_alongside() {
        let config = RelayConfig::from_lookup(lookup(&[
            (ENV_CONNECT, "10.0.0.1:22"),
            ("C2W_CONTROL_CAPACITY", "4096"),
        ]))
        .unwrap();
        assert_eq!(config.connect, "10.0.0.1:22");
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.bridge.control_capacity, 4096);
    }
}
