//! Declarative peer-connection routing table.
//!
//! Decides, for a pair of (local node type, peer node type), whether this node
//! keeps an outbound RPC connection to the peer. Rules are evaluated in order
//! and the first match wins; no match means no connection.

use serde::{Deserialize, Serialize};

/// Gateway node type used by the default table.
pub const DEFAULT_GATEWAY_TYPE: &str = "frontServer";
/// Relay node type used by the default table.
pub const DEFAULT_RELAY_TYPE: &str = "chatServer";

/// Which peer types a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "type", rename_all = "snake_case")]
pub enum PeerSelector {
    /// Exactly this peer type
    Exact(String),
    /// Every peer type except this one
    AnyExcept(String),
    /// Every peer type
    Any,
}

impl PeerSelector {
    pub fn matches(&self, peer_type: &str) -> bool {
        match self {
            PeerSelector::Exact(t) => t == peer_type,
            PeerSelector::AnyExcept(t) => t != peer_type,
            PeerSelector::Any => true,
        }
    }
}

/// What to do with a matched peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    /// Open a connection on join, close it on leave
    #[default]
    Connect,
    /// Explicitly never connect (stops evaluation of later rules)
    Ignore,
}

/// One row of the routing matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Type of this node
    pub local_type: String,
    /// Peer types covered by the rule
    pub peer: PeerSelector,
    #[serde(default)]
    pub action: RoutingAction,
}

impl RoutingRule {
    pub fn connect(local_type: impl Into<String>, peer: PeerSelector) -> Self {
        Self { local_type: local_type.into(), peer, action: RoutingAction::Connect }
    }
}

/// Ordered routing rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Table with no rules: never connect to anyone.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Gateways connect to every non-gateway peer; relays connect to gateways.
    pub fn gateway_relay(gateway_type: &str, relay_type: &str) -> Self {
        Self::new(vec![
            RoutingRule::connect(gateway_type, PeerSelector::AnyExcept(gateway_type.to_string())),
            RoutingRule::connect(relay_type, PeerSelector::Exact(gateway_type.to_string())),
        ])
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn push(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
    }

    /// Action for a peer of `peer_type` seen by a node of `local_type`.
    pub fn action_for(&self, local_type: &str, peer_type: &str) -> Option<RoutingAction> {
        self.rules
            .iter()
            .find(|rule| rule.local_type == local_type && rule.peer.matches(peer_type))
            .map(|rule| rule.action)
    }

    pub fn should_connect(&self, local_type: &str, peer_type: &str) -> bool {
        self.action_for(local_type, peer_type) == Some(RoutingAction::Connect)
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::gateway_relay(DEFAULT_GATEWAY_TYPE, DEFAULT_RELAY_TYPE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matrix() {
        let table = RoutingTable::default();
        assert!(table.should_connect("frontServer", "chatServer"));
        assert!(table.should_connect("frontServer", "loginServer"));
        assert!(!table.should_connect("frontServer", "frontServer"));
        assert!(table.should_connect("chatServer", "frontServer"));
        assert!(!table.should_connect("chatServer", "loginServer"));
        assert!(!table.should_connect("loginServer", "frontServer"));
    }

    #[test]
    fn test_first_match_wins() {
        let mut table = RoutingTable::new(vec![RoutingRule {
            local_type: "frontServer".to_string(),
            peer: PeerSelector::Exact("auditServer".to_string()),
            action: RoutingAction::Ignore,
        }]);
        table.push(RoutingRule::connect("frontServer", PeerSelector::Any));

        assert_eq!(table.action_for("frontServer", "auditServer"), Some(RoutingAction::Ignore));
        assert!(!table.should_connect("frontServer", "auditServer"));
        assert!(table.should_connect("frontServer", "chatServer"));
    }

    #[test]
    fn test_table_from_config_json() {
        let json = r#"[
            {"local_type": "gameServer", "peer": {"match": "exact", "type": "dbServer"}},
            {"local_type": "dbServer", "peer": {"match": "any"}, "action": "ignore"}
        ]"#;
        let table: RoutingTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.rules().len(), 2);
        assert!(table.should_connect("gameServer", "dbServer"));
        assert_eq!(table.action_for("dbServer", "gameServer"), Some(RoutingAction::Ignore));
        assert!(RoutingTable::empty().action_for("gameServer", "dbServer").is_none());
    }
}
