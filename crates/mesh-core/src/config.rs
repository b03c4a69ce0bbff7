//! Routing engine configuration

use crate::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// Routing engine tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Silence after which a route is expired (milliseconds)
    #[serde(default = "default_host_expiry_ms")]
    pub host_expiry_ms: u32,

    /// Interval between IAM/ICAN rounds (milliseconds)
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u32,

    /// Maximum number of route entries held
    #[serde(default = "default_max_hosts")]
    pub max_hosts: usize,

    /// TTL stamped on locally originated unicast frames
    #[serde(default = "default_unicast_ttl")]
    pub unicast_ttl: u8,
}

fn default_host_expiry_ms() -> u32 {
    30_000
}

fn default_advertise_interval_ms() -> u32 {
    5_000
}

fn default_max_hosts() -> usize {
    64
}

fn default_unicast_ttl() -> u8 {
    255
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            host_expiry_ms: default_host_expiry_ms(),
            advertise_interval_ms: default_advertise_interval_ms(),
            max_hosts: default_max_hosts(),
            unicast_ttl: default_unicast_ttl(),
        }
    }
}

impl MeshConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_hosts == 0 {
            return Err(MeshError::Config("max_hosts must be at least 1".to_string()));
        }
        if self.unicast_ttl == 0 {
            return Err(MeshError::Config("unicast_ttl must be at least 1".to_string()));
        }
        if self.advertise_interval_ms >= self.host_expiry_ms {
            return Err(MeshError::Config(format!(
                "advertise_interval_ms ({}) must be shorter than host_expiry_ms ({})",
                self.advertise_interval_ms, self.host_expiry_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.host_expiry_ms, 30_000);
        assert_eq!(config.advertise_interval_ms, 5_000);
        assert_eq!(config.unicast_ttl, 255);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MeshConfig = toml::from_str("max_hosts = 8").unwrap();
        assert_eq!(config.max_hosts, 8);
        assert_eq!(config.host_expiry_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_interval_longer_than_expiry() {
        let config = MeshConfig {
            advertise_interval_ms: 40_000,
            ..MeshConfig::default()
        };
        assert!(matches!(config.validate(), Err(MeshError::Config(_))));
    }
}
