use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nodemesh-server",
    about = "Nodemesh node - cluster membership and session routing",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[arg(short, long, env = "NODEMESH_CONFIG", help = "Path to the node config JSON file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "NODEMESH_NODE_TYPE", help = "Override the node type")]
    pub node_type: Option<String>,

    #[arg(long, env = "NODEMESH_NODE_NAME", help = "Override the node name")]
    pub node_name: Option<String>,

    #[arg(short, long, env = "NODEMESH_HTTP_PORT", help = "Override the HTTP control port")]
    pub port: Option<u16>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn overrides(&self) -> crate::config::Overrides {
        crate::config::Overrides {
            node_type: self.node_type.clone(),
            node_name: self.node_name.clone(),
            http_port: self.port,
        }
    }
}
