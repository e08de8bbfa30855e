pub mod adjacency;
pub mod store;
pub mod types;

pub use store::TopologyStore;
pub use types::{Adjacency, Detector, Junction, JunctionKind, LaneRelation};
