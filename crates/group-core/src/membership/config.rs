use crate::transport::TransportConfig;

/// Tuning knobs for a [`GroupManager`](super::GroupManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// UDP port shared by every node, also used for the join channel (default: 8500)
    pub port: u16,
    /// Hops a PING or INFO may travel (default: 1)
    pub ping_hop_count: u8,
    /// How often a PING goes out (default: 2s)
    pub ping_interval_ms: u64,
    /// Flood probability for PING and INFO (default: 100)
    pub ping_flood_prob: u8,
    /// A peer is dead after `ping_interval × factor` of silence (default: 5)
    pub node_timeout_factor: u8,
    /// How often the full INFO is re-broadcast (default: 10s)
    pub info_interval_ms: u64,
    /// Default hops for search requests (default: 3)
    pub search_hop_count: u8,
    /// Default flood probability for search requests (default: 100)
    pub search_flood_prob: u8,
    /// Default search TTL in ms; 0 is one-shot, negative never expires (default: 0)
    pub search_ttl_ms: i32,
    /// A cached foreign search is dropped if not refreshed within this (default: 20s)
    pub search_lease_ms: u64,
    /// How often our own persistent searches are re-broadcast (default: 10s)
    pub search_resend_interval_ms: u64,
    /// Send PING and INFO at all (default: true)
    pub advertise: bool,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8500,
            ping_hop_count: 1,
            ping_interval_ms: 2000,
            ping_flood_prob: 100,
            node_timeout_factor: 5,
            info_interval_ms: 10_000,
            search_hop_count: 3,
            search_flood_prob: 100,
            search_ttl_ms: 0,
            search_lease_ms: 20_000,
            search_resend_interval_ms: 10_000,
            advertise: true,
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Transport settings with the port kept in step with ours.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            port: self.port,
            ..self.transport.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.port, 8500);
        assert_eq!(config.ping_interval_ms, 2000);
        assert_eq!(config.node_timeout_factor, 5);
        assert_eq!(config.search_hop_count, 3);
        assert!(config.search_lease_ms > config.search_resend_interval_ms);
        assert!(config.advertise);
    }

    #[test]
    fn test_transport_port_follows_engine_port() {
        let config = EngineConfig {
            port: 9100,
            ..Default::default()
        };
        assert_eq!(config.transport_config().port, 9100);
    }
}
