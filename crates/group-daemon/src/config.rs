//! YAML daemon configuration.
//!
//! ```yaml
//! node_name: alpha
//! port: 8500
//! interfaces:
//!   - address: 192.168.1.10/24
//!     kind: udp-multicast
//!   - kind: tcp-relay
//! relay_nodes: ["203.0.113.7:8501"]
//! groups:
//!   - name: ops
//!     password: s3cret
//!     data: "rack 4"
//! joins:
//!   - group: lobby
//!     creator: 6f1c2b1e-7d7a-4bd4-9d55-0d8c3e6a1f20
//!     mode: persistent
//! searches:
//!   - group: ops
//!     param: "who has disk?"
//! tuning:
//!   ping_interval_ms: 1000
//! ```

use group_core::{EngineConfig, InterfaceKind, JoinMode, Nic, NodeId};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 8500;
pub const DEFAULT_RELAY_PORT: u16 = 8501;
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 85);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid interface address '{0}'")]
    InvalidAddress(String),
    #[error("Interface kind '{0}' needs an address")]
    MissingAddress(String),
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub node_name: String,
    pub port: u16,
    /// TCP port relayed broadcasts arrive on.
    pub relay_port: u16,
    /// Empty means autodetect.
    pub interfaces: Vec<InterfaceConfig>,
    pub relay_nodes: Vec<SocketAddrV4>,
    pub groups: Vec<GroupConfig>,
    pub joins: Vec<JoinConfig>,
    pub searches: Vec<SearchConfig>,
    pub tuning: TuningConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: "group-daemon".to_string(),
            port: DEFAULT_PORT,
            relay_port: DEFAULT_RELAY_PORT,
            interfaces: Vec::new(),
            relay_nodes: Vec::new(),
            groups: Vec::new(),
            joins: Vec::new(),
            searches: Vec::new(),
            tuning: TuningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// CIDR, e.g. `10.0.0.5/24`. Relays have none.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub multicast_group: Option<Ipv4Addr>,
}

fn default_kind() -> String {
    InterfaceKind::default().as_str().to_string()
}

impl InterfaceConfig {
    pub fn nic(&self) -> Result<Option<Nic>, ConfigError> {
        let Some(address) = &self.address else {
            return Ok(None);
        };
        let network: Ipv4Network = address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.clone()))?;
        Ok(Some(Nic::new(network.ip(), network.mask())))
    }

    pub fn is_relay(&self) -> bool {
        self.kind == InterfaceKind::TcpRelay.as_str()
    }
}

/// A group this node creates at startup. A password makes it private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default = "default_hop_count")]
    pub hop_count: u8,
    #[serde(default = "default_flood_prob")]
    pub flood_prob: u8,
}

fn default_hop_count() -> u8 {
    1
}

fn default_flood_prob() -> u8 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub group: String,
    pub creator: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub mode: JoinMode,
    #[serde(default)]
    pub data: Option<String>,
}

impl JoinConfig {
    pub fn creator_id(&self) -> Result<NodeId, ConfigError> {
        self.creator
            .parse()
            .map_err(|e| ConfigError::InvalidNodeId(format!("{}: {e}", self.creator)))
    }
}

/// A persistent search started once the node is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub group: String,
    #[serde(default)]
    pub param: String,
}

/// Overrides for [`EngineConfig`]; unset fields keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub ping_interval_ms: Option<u64>,
    pub ping_hop_count: Option<u8>,
    pub ping_flood_prob: Option<u8>,
    pub node_timeout_factor: Option<u8>,
    pub info_interval_ms: Option<u64>,
    pub search_hop_count: Option<u8>,
    pub search_flood_prob: Option<u8>,
    pub search_ttl_ms: Option<i32>,
    pub search_lease_ms: Option<u64>,
    pub search_resend_interval_ms: Option<u64>,
    pub advertise: Option<bool>,
    pub reliable_ttl_ms: Option<u64>,
}

impl TuningConfig {
    fn apply(&self, config: &mut EngineConfig) {
        fn set<T: Copy>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut config.ping_interval_ms, self.ping_interval_ms);
        set(&mut config.ping_hop_count, self.ping_hop_count);
        set(&mut config.ping_flood_prob, self.ping_flood_prob);
        set(&mut config.node_timeout_factor, self.node_timeout_factor);
        set(&mut config.info_interval_ms, self.info_interval_ms);
        set(&mut config.search_hop_count, self.search_hop_count);
        set(&mut config.search_flood_prob, self.search_flood_prob);
        set(&mut config.search_ttl_ms, self.search_ttl_ms);
        set(&mut config.search_lease_ms, self.search_lease_ms);
        set(&mut config.search_resend_interval_ms, self.search_resend_interval_ms);
        set(&mut config.advertise, self.advertise);
        set(&mut config.transport.default_reliable_ttl_ms, self.reliable_ttl_ms);
    }
}

impl DaemonConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&contents)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            port: self.port,
            ..Default::default()
        };
        self.tuning.apply(&mut config);
        config
    }

    /// Relay nodes outside every local subnet.
    pub fn remote_relays(&self, local: &[Nic]) -> Vec<SocketAddrV4> {
        self.relay_nodes
            .iter()
            .filter(|relay| {
                let on_subnet = local.iter().any(|nic| nic.contains(*relay.ip()));
                if on_subnet {
                    warn!("Skipping relay node {} on a local subnet", relay);
                }
                !on_subnet
            })
            .copied()
            .collect()
    }

    /// Configured interfaces, or one multicast interface per detected
    /// address when none are listed.
    pub fn effective_interfaces(&self) -> Vec<InterfaceConfig> {
        if !self.interfaces.is_empty() {
            return self.interfaces.clone();
        }
        let mut detected = detect_interfaces();
        if !self.relay_nodes.is_empty() {
            detected.push(InterfaceConfig {
                address: None,
                kind: InterfaceKind::TcpRelay.as_str().to_string(),
                multicast_group: None,
            });
        }
        detected
    }
}

/// Non-loopback IPv4 addresses of this host. The netmask is not reported,
/// so each is taken as a /24.
pub fn detect_interfaces() -> Vec<InterfaceConfig> {
    let addrs = match local_ip_address::list_afinet_netifas() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Interface autodetection failed: {}", e);
            return Vec::new();
        }
    };
    addrs
        .into_iter()
        .filter_map(|(name, addr)| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() => {
                info!("Detected interface {} at {}", name, ip);
                Some(InterfaceConfig {
                    address: Some(format!("{ip}/24")),
                    kind: default_kind(),
                    multicast_group: None,
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
node_name: alpha
port: 9000
interfaces:
  - address: 10.1.2.3/16
    kind: udp-broadcast
  - kind: tcp-relay
relay_nodes: ["10.1.9.9:8501", "192.0.2.1:8501"]
groups:
  - name: ops
    password: s3cret
    data: rack 4
  - name: lobby
    managed: true
joins:
  - group: hall
    creator: node-x
    mode: persistent
searches:
  - group: ops
    param: who?
tuning:
  ping_interval_ms: 500
  advertise: false
"#;

    // ==================== Parsing ====================

    #[test]
    fn test_parse_sample() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.node_name, "alpha");
        assert_eq!(config.port, 9000);
        assert_eq!(config.relay_port, DEFAULT_RELAY_PORT);
        assert_eq!(config.interfaces.len(), 2);
        assert!(config.interfaces[1].is_relay());
        assert_eq!(config.groups[0].password.as_deref(), Some("s3cret"));
        assert_eq!(config.groups[0].hop_count, 1);
        assert!(config.groups[1].managed);
        assert_eq!(config.joins[0].mode, JoinMode::Persistent);
        assert_eq!(config.searches[0].param, "who?");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DaemonConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_interface_kind_defaults_to_norelay_multicast() {
        let config = DaemonConfig::from_yaml("interfaces:\n  - address: 10.0.0.1/24\n").unwrap();
        assert_eq!(config.interfaces[0].kind, "udp-multicast-norelay");
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            DaemonConfig::from_yaml("port: [nope"),
            Err(ConfigError::Yaml(_))
        ));
    }

    // ==================== Interfaces ====================

    #[test]
    fn test_nic_from_cidr() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        let nic = config.interfaces[0].nic().unwrap().unwrap();
        assert_eq!(nic.ip, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(nic.netmask, Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(config.interfaces[1].nic().unwrap(), None);
    }

    #[test]
    fn test_bad_cidr_rejected() {
        let iface = InterfaceConfig {
            address: Some("10.0.0.300/24".into()),
            kind: default_kind(),
            multicast_group: None,
        };
        assert!(matches!(iface.nic(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_relays_on_local_subnet_skipped() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        let local = [config.interfaces[0].nic().unwrap().unwrap()];
        assert_eq!(
            config.remote_relays(&local),
            vec![SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 8501)]
        );
    }

    // ==================== Tuning ====================

    #[test]
    fn test_tuning_overrides_engine_defaults() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.port, 9000);
        assert_eq!(engine.ping_interval_ms, 500);
        assert!(!engine.advertise);
        // untouched fields keep their defaults
        assert_eq!(engine.info_interval_ms, EngineConfig::default().info_interval_ms);
    }

    #[test]
    fn test_join_creator_parsed() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.joins[0].creator_id().unwrap().as_str(), "node-x");
    }
}
