//! Node records as stored in the directory.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between key segments (`<type>/<name>`, `config/<name>`).
pub const KEY_SEPARATOR: &str = "/";

/// Prefix holding read-only configuration entries.
pub const CONFIG_PREFIX: &str = "config";

const DEFAULT_MAX_CLIENT_COUNT: u32 = 65536;

/// Directory key for a configuration entry.
pub fn config_key(name: &str) -> String {
    format!("{CONFIG_PREFIX}{KEY_SEPARATOR}{name}")
}

/// Lease identifier handed out by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// `(type, name)` pair identifying one membership key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub node_type: String,
    pub name: String,
}

impl NodeKey {
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self { node_type: node_type.into(), name: name.into() }
    }

    /// Directory key, `<type>/<name>`.
    pub fn directory_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.node_type, self.name)
    }

    /// Split a directory key back into its type and name.
    ///
    /// Names may not contain the separator, so the first separator wins.
    pub fn parse(key: &str) -> Option<Self> {
        let (node_type, name) = key.split_once(KEY_SEPARATOR)?;
        if node_type.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(node_type, name))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.node_type, self.name)
    }
}

/// Registration record of one running node.
///
/// Field names on the wire are kept compatible with records written by
/// existing cluster members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique within the node type
    pub name: String,
    /// Node type discriminator, also the membership prefix
    #[serde(rename = "type")]
    pub node_type: String,
    /// Client-facing TCP address
    #[serde(rename = "TCPAddr", default)]
    pub tcp_addr: String,
    /// Client-facing WebSocket address
    #[serde(rename = "WSAddr", default)]
    pub ws_addr: String,
    /// Peer RPC listen address, empty when the node accepts no peers
    #[serde(rename = "listenAddr", default)]
    pub listen_addr: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(rename = "clientCount", default)]
    pub client_count: u32,
    #[serde(rename = "maxClientCount", default)]
    pub max_client_count: u32,
    /// Regenerated on every process start
    #[serde(rename = "globalId")]
    pub incarnation_id: String,
}

impl NodeRecord {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.node_type.clone(), self.name.clone())
    }

    pub fn directory_key(&self) -> String {
        self.key().directory_key()
    }

    /// A server accepts new clients while below its maximum.
    pub fn is_eligible(&self) -> bool {
        self.client_count < self.max_client_count
    }

    pub fn has_listen_addr(&self) -> bool {
        !self.listen_addr.is_empty()
    }

    /// Same running process as `other` (not merely the same name).
    pub fn same_incarnation(&self, other: &NodeRecord) -> bool {
        self.incarnation_id == other.incarnation_id
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Locally configured identity of this node, before an incarnation id is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub tcp_addr: String,
    #[serde(default)]
    pub ws_addr: String,
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_max_client_count")]
    pub max_client_count: u32,
}

fn default_max_client_count() -> u32 {
    DEFAULT_MAX_CLIENT_COUNT
}

impl NodeDescriptor {
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: name.into(),
            tcp_addr: String::new(),
            ws_addr: String::new(),
            listen_addr: String::new(),
            weight: 0,
            max_client_count: DEFAULT_MAX_CLIENT_COUNT,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.node_type.clone(), self.name.clone())
    }

    /// Build the record advertised for one process lifetime.
    pub fn to_record(&self, incarnation_id: &str) -> NodeRecord {
        NodeRecord {
            name: self.name.clone(),
            node_type: self.node_type.clone(),
            tcp_addr: self.tcp_addr.clone(),
            ws_addr: self.ws_addr.clone(),
            listen_addr: self.listen_addr.clone(),
            weight: self.weight,
            client_count: 0,
            max_client_count: self.max_client_count,
            incarnation_id: incarnation_id.to_string(),
        }
    }
}

/// Fresh incarnation id for this process.
pub fn new_incarnation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> NodeRecord {
        let mut desc = NodeDescriptor::new("chatServer", "chat-1");
        desc.ws_addr = "10.0.0.5:3653".to_string();
        desc.listen_addr = "10.0.0.5:9001".to_string();
        let mut record = desc.to_record("5f1c2e");
        record.client_count = 12;
        record
    }

    #[test]
    fn test_record_roundtrip_keeps_every_field() {
        let record = sample();
        let decoded = NodeRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "chatServer");
        assert_eq!(json["WSAddr"], "10.0.0.5:3653");
        assert_eq!(json["listenAddr"], "10.0.0.5:9001");
        assert_eq!(json["clientCount"], 12);
        assert_eq!(json["maxClientCount"], 65536);
        assert_eq!(json["globalId"], "5f1c2e");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NodeRecord::decode(b"{not json").is_err());
        assert!(NodeRecord::decode(br#"{"name":"x"}"#).is_err());
    }

    #[test]
    fn test_node_key_parse() {
        let key = NodeKey::parse("frontServer/front-1").unwrap();
        assert_eq!(key, NodeKey::new("frontServer", "front-1"));
        assert_eq!(key.directory_key(), "frontServer/front-1");
        assert!(NodeKey::parse("frontServer").is_none());
        assert!(NodeKey::parse("/front-1").is_none());
    }

    #[test]
    fn test_eligibility() {
        let mut record = sample();
        record.max_client_count = 12;
        assert!(!record.is_eligible());
        record.client_count = 11;
        assert!(record.is_eligible());
    }

    #[test]
    fn test_incarnation_ids_are_unique() {
        assert_ne!(new_incarnation_id(), new_incarnation_id());
        assert_eq!(config_key("gate"), "config/gate");
    }
}
