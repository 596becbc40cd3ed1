//! Configuration management for PASER nodes.

use crate::error::{CoreError, CoreResult};
use crate::types::{AddressRange, GeoPosition, NetworkInterface};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaserConfig {
    pub node: NodeConfig,
    pub timers: TimerConfig,
    pub policy: PolicyConfig,
    pub security: SecurityConfig,
}

/// Identity and addressing of the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Primary address of the node
    pub address: Ipv4Addr,
    /// Whether this node is a gateway with a link to the KDC
    pub is_gateway: bool,
    /// Wireless interfaces PASER runs on
    pub interfaces: Vec<NetworkInterface>,
    /// Subnets behind this node (AddL)
    pub subnets: Vec<AddressRange>,
    /// Address of the key distribution center
    pub kdc_address: Ipv4Addr,
    /// Static position used when no positioning source is attached
    pub position: GeoPosition,
}

/// Protocol timers, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub route_delete_ms: u64,
    pub route_valid_ms: u64,
    pub neighbor_delete_ms: u64,
    pub neighbor_valid_ms: u64,
    pub hello_interval_ms: u64,
    pub rreq_wait_ms: u64,
    pub rreq_tries: u32,
    pub rrep_wait_ms: u64,
    pub rrep_tries: u32,
    pub kdc_wait_ms: u64,
    /// Minimum interval between two single-destination error reports
    pub rerr_limit_ms: u64,
    /// Accepted clock skew for timestamped broadcasts
    pub timestamp_tolerance_ms: u64,
    pub root_repetition_ms: u64,
}

/// Protocol behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub hello_enabled: bool,
    /// Search for a gateway again after the first registration was lost
    pub gateway_research: bool,
    pub local_repair: bool,
    pub max_local_repair_hops: u32,
    /// Radio range used by the geographic plausibility check
    pub radius: f64,
    /// Order k of the authentication tree (2^k secrets)
    pub tree_order: u32,
    /// Number of additional root broadcasts after a regeneration
    pub root_repetitions: u32,
    pub link_layer_feedback: bool,
}

/// Locations of key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_cert_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(10, 0, 0, 1),
            is_gateway: false,
            interfaces: vec![NetworkInterface {
                ifindex: 0,
                addr: Ipv4Addr::new(10, 0, 0, 1),
                broadcast: Ipv4Addr::BROADCAST,
                mask: Ipv4Addr::new(255, 255, 0, 0),
            }],
            subnets: Vec::new(),
            kdc_address: Ipv4Addr::new(10, 10, 0, 1),
            position: GeoPosition::default(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            route_delete_ms: 30_000,
            route_valid_ms: 6_000,
            neighbor_delete_ms: 20_000,
            neighbor_valid_ms: 6_000,
            hello_interval_ms: 5_000,
            rreq_wait_ms: 1_000,
            rreq_tries: 3,
            rrep_wait_ms: 1_000,
            rrep_tries: 3,
            kdc_wait_ms: 5_000,
            rerr_limit_ms: 500,
            timestamp_tolerance_ms: 120_000,
            root_repetition_ms: 1_000,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hello_enabled: true,
            gateway_research: true,
            local_repair: false,
            max_local_repair_hops: 3,
            radius: 250.0,
            tree_order: 10,
            root_repetitions: 2,
            link_layer_feedback: true,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("cert/router.json"),
            key_path: PathBuf::from("cert/router.key"),
            ca_cert_path: PathBuf::from("cert/ca.pub"),
        }
    }
}

impl PaserConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: PaserConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the protocol engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.policy.tree_order > 31 {
            return Err(CoreError::InvalidConfig(format!(
                "tree_order {} exceeds 31",
                self.policy.tree_order
            )));
        }
        if self.timers.rreq_tries == 0 || self.timers.rrep_tries == 0 {
            return Err(CoreError::InvalidConfig(
                "retry budgets must be at least 1".to_string(),
            ));
        }
        if self.node.interfaces.is_empty() {
            return Err(CoreError::InvalidConfig(
                "at least one interface is required".to_string(),
            ));
        }
        Ok(())
    }
}
