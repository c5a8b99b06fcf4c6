//! Distributed communication trait definitions

use async_trait::async_trait;

use super::error::M2nError;
use super::partition::MeshPartition;
use crate::mesh::MeshId;

/// Mesh-aware exchange between the ranks of two participants
///
/// Each rank sends exactly the vertices it shares with each remote rank.
/// The connection can be set up directly when both vertex distributions are
/// known, or via a pre-connection between all rank pairs followed by a mesh
/// broadcast or a communication map.
#[async_trait]
pub trait DistributedCommunication: Send + Sync {
    fn mesh_id(&self) -> MeshId;

    fn is_connected(&self) -> bool;

    async fn accept_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError>;

    async fn request_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError>;

    /// Connects every local rank to every remote rank
    async fn accept_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError>;

    async fn request_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError>;

    async fn broadcast_send_local_mesh(&mut self) -> Result<(), M2nError>;

    async fn broadcast_receive_local_mesh(&mut self) -> Result<(), M2nError>;

    async fn send_communication_map(&mut self) -> Result<(), M2nError>;

    async fn receive_communication_map(&mut self) -> Result<(), M2nError>;

    /// Sends `values` laid out as `dimension` components per local vertex
    async fn send(&mut self, values: &[f64], dimension: usize) -> Result<(), M2nError>;

    async fn receive(&mut self, values: &mut [f64], dimension: usize) -> Result<(), M2nError>;

    async fn close_connection(&mut self) -> Result<(), M2nError>;
}

pub trait DistributedComFactory: Send + Sync {
    fn new_distributed_communication(&self, partition: MeshPartition) -> Box<dyn DistributedCommunication>;
}
