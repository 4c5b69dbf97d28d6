//! Node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::node::{NodeDescriptor, KEY_SEPARATOR};
use super::routing::RoutingTable;
use crate::error::ConfigError;

/// What the registry does when the directory drops this node's own record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfLossPolicy {
    /// Publish the alert and leave recovery to the operator
    #[default]
    Alert,
    /// Grant a new lease and write the record again
    Reregister,
}

/// Full configuration of one mesh node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identity and addresses
    pub node: NodeDescriptor,
    /// Prefixes mirrored in addition to the node's own type
    #[serde(default)]
    pub watch_prefixes: Vec<String>,
    /// Directory endpoints
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Lease time-to-live in seconds (default: 45)
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Renewal interval in seconds; a third of the TTL when unset
    #[serde(default)]
    pub keep_alive_interval_secs: Option<u64>,
    /// Upper bound for a single renewal attempt (default: 5)
    #[serde(default = "default_keep_alive_timeout_secs")]
    pub keep_alive_timeout_secs: u64,
    /// Default deadline for directory calls on the request path (default: 3000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Peer connection rules
    #[serde(default)]
    pub routing_table: RoutingTable,
    #[serde(default)]
    pub self_loss_policy: SelfLossPolicy,
    /// HTTP control surface port (default: 8046)
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_lease_ttl_secs() -> u64 {
    45
}

fn default_keep_alive_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_http_port() -> u16 {
    8046
}

impl NodeConfig {
    pub fn new(node: NodeDescriptor) -> Self {
        Self {
            node,
            watch_prefixes: Vec::new(),
            endpoints: Vec::new(),
            lease_ttl_secs: default_lease_ttl_secs(),
            keep_alive_interval_secs: None,
            keep_alive_timeout_secs: default_keep_alive_timeout_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            routing_table: RoutingTable::default(),
            self_loss_policy: SelfLossPolicy::default(),
            http_port: default_http_port(),
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        match self.keep_alive_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs((self.lease_ttl_secs / 3).max(1)),
        }
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Own prefix first, then each extra prefix once.
    pub fn mirrored_prefixes(&self) -> Vec<String> {
        let mut prefixes = vec![self.node.node_type.clone()];
        for prefix in &self.watch_prefixes {
            if !prefixes.contains(prefix) {
                prefixes.push(prefix.clone());
            }
        }
        prefixes
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("node.type", &self.node.node_type), ("node.name", &self.node.name)] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must not contain '{KEY_SEPARATOR}'"),
                ));
            }
        }
        if let Some(prefix) = self
            .watch_prefixes
            .iter()
            .find(|p| p.trim().is_empty() || p.contains(KEY_SEPARATOR))
        {
            return Err(ConfigError::invalid(
                "watch_prefixes",
                format!("invalid prefix '{prefix}'"),
            ));
        }
        if self.lease_ttl_secs == 0 {
            return Err(ConfigError::invalid("lease_ttl_secs", "must be greater than zero"));
        }
        if self.keep_alive_interval() >= self.lease_ttl() {
            return Err(ConfigError::invalid(
                "keep_alive_interval_secs",
                "must be shorter than the lease TTL",
            ));
        }
        if self.keep_alive_timeout_secs == 0 {
            return Err(ConfigError::invalid("keep_alive_timeout_secs", "must be greater than zero"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let json = r#"{"node": {"type": "frontServer", "name": "front-1"}}"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.lease_ttl_secs, 45);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(15));
        assert_eq!(config.node.max_client_count, 65536);
        assert_eq!(config.self_loss_policy, SelfLossPolicy::Alert);
        assert_eq!(config.routing_table, RoutingTable::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mirrored_prefixes_deduplicates() {
        let mut config = NodeConfig::new(NodeDescriptor::new("frontServer", "front-1"));
        config.watch_prefixes = vec!["chatServer".into(), "frontServer".into(), "chatServer".into()];
        assert_eq!(config.mirrored_prefixes(), vec!["frontServer", "chatServer"]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = NodeConfig::new(NodeDescriptor::new("frontServer", "front/1"));
        assert!(config.validate().is_err());

        config.node.name = "front-1".to_string();
        config.lease_ttl_secs = 10;
        config.keep_alive_interval_secs = Some(10);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_alive_interval_secs"));

        config.keep_alive_interval_secs = Some(3);
        config.watch_prefixes = vec![String::new()];
        assert!(config.validate().is_err());
    }
}
