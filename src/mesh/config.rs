//! Mesh Configuration
//!
//! Tuning knobs for the mesh protocol (discovery, keepalive, scanning,
//! liveness). Defaults mirror spec §4 exactly; every field is independently
//! overridable from the config file or environment so several nodes can run
//! on one host during development.

use serde::{Deserialize, Serialize};

pub const DISCOVERY_MAGIC: &[u8] = b"MESHSENTINEL_HELLO_v1|";
pub const PROTOCOL_VERSION: &str = "1";

fn default_tcp_port() -> u16 {
    5555
}
fn default_udp_port() -> u16 {
    5556
}
fn default_discovery_interval_secs() -> u64 {
    2
}
fn default_peer_timeout_secs() -> u64 {
    30
}
fn default_keepalive_interval_secs() -> u64 {
    5
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_scan_warmup_secs() -> u64 {
    3
}
fn default_scan_connect_timeout_ms() -> u64 {
    300
}
fn default_relay_timeout_secs() -> u64 {
    3
}
fn default_udp_recv_timeout_secs() -> u64 {
    5
}

/// Mesh protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    /// TCP port for the alert wire protocol (default: 5555)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// UDP port for link-local discovery hellos (default: 5556)
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Announcer tick interval (default: 2s)
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,

    /// Liveness TTL for Link Registry entries (default: 30s)
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,

    /// TCP keepalive ping interval (default: 5s)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Subnet probe interval (default: 30s)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Delay before the first subnet probe (default: 3s)
    #[serde(default = "default_scan_warmup_secs")]
    pub scan_warmup_secs: u64,

    /// Per-host connect timeout during a subnet probe, in milliseconds (default: 300ms)
    #[serde(default = "default_scan_connect_timeout_ms")]
    pub scan_connect_timeout_ms: u64,

    /// Per-peer outbound relay connect+send timeout (default: 3s)
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,

    /// UDP recv timeout used by the Discovery Listener to observe cancellation (default: 5s)
    #[serde(default = "default_udp_recv_timeout_secs")]
    pub udp_recv_timeout_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            discovery_interval_secs: default_discovery_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            scan_warmup_secs: default_scan_warmup_secs(),
            scan_connect_timeout_ms: default_scan_connect_timeout_ms(),
            relay_timeout_secs: default_relay_timeout_secs(),
            udp_recv_timeout_secs: default_udp_recv_timeout_secs(),
        }
    }
}

impl MeshConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tcp_port == 0 {
            return Err("mesh.tcp_port must be greater than 0".to_string());
        }
        if self.udp_port == 0 {
            return Err("mesh.udp_port must be greater than 0".to_string());
        }
        if self.tcp_port == self.udp_port {
            return Err("mesh.tcp_port and mesh.udp_port must differ".to_string());
        }
        if self.discovery_interval_secs == 0 {
            return Err("mesh.discovery_interval_secs must be positive".to_string());
        }
        if self.peer_timeout_secs <= self.discovery_interval_secs {
            return Err(
                "mesh.peer_timeout_secs must be greater than discovery_interval_secs".to_string(),
            );
        }
        if self.keepalive_interval_secs == 0 {
            return Err("mesh.keepalive_interval_secs must be positive".to_string());
        }
        if self.scan_interval_secs == 0 {
            return Err("mesh.scan_interval_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn peer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.peer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();

        assert_eq!(config.tcp_port, 5555);
        assert_eq!(config.udp_port, 5556);
        assert_eq!(config.discovery_interval_secs, 2);
        assert_eq!(config.peer_timeout_secs, 30);
        assert_eq!(config.keepalive_interval_secs, 5);
        assert_eq!(config.scan_interval_secs, 30);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = MeshConfig::default();
        config.tcp_port = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            "mesh.tcp_port must be greater than 0"
        );
    }

    #[test]
    fn test_config_validation_equal_ports() {
        let mut config = MeshConfig::default();
        config.udp_port = config.tcp_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_timeout() {
        let mut config = MeshConfig::default();
        config.peer_timeout_secs = 1;
        config.discovery_interval_secs = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn magic_is_22_bytes() {
        assert_eq!(DISCOVERY_MAGIC.len(), 22);
    }
}
