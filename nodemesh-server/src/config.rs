//! Node configuration loading.
//!
//! Order: JSON file (when given), then CLI / environment overrides, then
//! validation. Without a file, type and name must come from the overrides.

use nodemesh_types::{ConfigError, NodeConfig, NodeDescriptor};
use std::path::Path;

/// Values supplied on the command line or through `NODEMESH_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub node_type: Option<String>,
    pub node_name: Option<String>,
    pub http_port: Option<u16>,
}

pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<NodeConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let node_type = overrides
                .node_type
                .clone()
                .ok_or_else(|| ConfigError::invalid("node.type", "required without a config file"))?;
            let node_name = overrides
                .node_name
                .clone()
                .ok_or_else(|| ConfigError::invalid("node.name", "required without a config file"))?;
            NodeConfig::new(NodeDescriptor::new(node_type, node_name))
        },
    };

    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound { path: path.display().to_string() });
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError { message: format!("failed to read {}: {e}", path.display()) })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::from_json_error(&e))
}

fn apply_overrides(config: &mut NodeConfig, overrides: &Overrides) {
    if let Some(node_type) = &overrides.node_type {
        config.node.node_type.clone_from(node_type);
    }
    if let Some(node_name) = &overrides.node_name {
        config.node.name.clone_from(node_name);
    }
    if let Some(port) = overrides.http_port {
        config.http_port = port;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_with_overrides() {
        let file = write_config(
            r#"{
                "node": {"type": "chatServer", "name": "chat-1", "listen_addr": "10.0.0.5:9001"},
                "watch_prefixes": ["frontServer"],
                "lease_ttl_secs": 30,
                "self_loss_policy": "reregister"
            }"#,
        );
        let overrides = Overrides { node_name: Some("chat-7".into()), http_port: Some(9100), ..Default::default() };

        let config = load_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.node.name, "chat-7");
        assert_eq!(config.node.node_type, "chatServer");
        assert_eq!(config.node.listen_addr, "10.0.0.5:9001");
        assert_eq!(config.http_port, 9100);
        assert_eq!(config.mirrored_prefixes(), vec!["chatServer", "frontServer"]);
        assert_eq!(config.self_loss_policy, nodemesh_types::SelfLossPolicy::Reregister);
    }

    #[test]
    fn test_overrides_alone_build_a_config() {
        let overrides = Overrides {
            node_type: Some("frontServer".into()),
            node_name: Some("front-1".into()),
            http_port: None,
        };
        let config = load_config(None, &overrides).unwrap();
        assert_eq!(config.node.key().directory_key(), "frontServer/front-1");
        assert_eq!(config.http_port, 8046);
    }

    #[test]
    fn test_errors() {
        let missing = load_config(Some(Path::new("/definitely/not/here.json")), &Overrides::default());
        assert!(matches!(missing, Err(ConfigError::NotFound { .. })));

        let file = write_config("{ not json");
        let parsed = load_config(Some(file.path()), &Overrides::default());
        assert!(matches!(parsed, Err(ConfigError::ParseError { .. })));

        let unnamed = load_config(None, &Overrides { node_type: Some("frontServer".into()), ..Default::default() });
        assert!(matches!(unnamed, Err(ConfigError::ValidationError { .. })));

        let file = write_config(r#"{"node": {"type": "frontServer", "name": "a/b"}}"#);
        let invalid = load_config(Some(file.path()), &Overrides::default());
        assert!(matches!(invalid, Err(ConfigError::ValidationError { .. })));
    }
}
