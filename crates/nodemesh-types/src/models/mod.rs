//! Domain models for nodemesh.

pub mod config;
pub mod node;
pub mod router;
pub mod routing;

pub use config::{NodeConfig, SelfLossPolicy};
pub use node::{
    config_key, new_incarnation_id, LeaseId, NodeDescriptor, NodeKey, NodeRecord, CONFIG_PREFIX,
    KEY_SEPARATOR,
};
pub use router::{
    DeleteAssignmentsRequest, SelectServerRequest, SelectServerResponse, UpdateClientCountRequest,
};
pub use routing::{PeerSelector, RoutingAction, RoutingRule, RoutingTable};
