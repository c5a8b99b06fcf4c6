//! M2N communication between two parallel participants
//!
//! - [`M2N`] - master connection plus one distributed communication per mesh
//! - [`DistributedCommunication`] - mesh-aware rank-to-rank exchange
//! - [`PointToPointCommunication`] - exchanges only shared vertices per rank pair

mod bridge;
mod distributed;
mod error;
mod partition;
mod point_to_point;

pub use bridge::M2N;
pub use distributed::{DistributedComFactory, DistributedCommunication};
pub use error::M2nError;
pub use partition::{MeshPartition, VertexDistribution};
pub use point_to_point::{PointToPointComFactory, PointToPointCommunication};
