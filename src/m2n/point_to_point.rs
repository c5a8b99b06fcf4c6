//! Point-to-point distributed communication

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::distributed::{DistributedComFactory, DistributedCommunication};
use super::error::M2nError;
use super::partition::{MeshPartition, VertexDistribution, shared_positions};
use crate::com::{Communication, CommunicationFactory};
use crate::mesh::MeshId;

pub struct PointToPointCommunication {
    partition: MeshPartition,
    com: Box<dyn Communication>,
    connected: bool,
    /// Remote rank -> local vertex positions, ordered by global index.
    /// Unset after a pre-connection until the mesh broadcast or the
    /// communication map has been exchanged.
    mapping: Option<BTreeMap<usize, Vec<usize>>>,
}

impl PointToPointCommunication {
    pub fn new(partition: MeshPartition, com: Box<dyn Communication>) -> Self {
        debug!(mesh = %partition.mesh_id, rank = partition.rank, "PointToPointCommunication::new: called");
        Self {
            partition,
            com,
            connected: false,
            mapping: None,
        }
    }

    pub fn partition(&self) -> &MeshPartition {
        &self.partition
    }

    /// Remote ranks this rank exchanges values with
    pub fn exchange_ranks(&self) -> Vec<usize> {
        self.mapping
            .as_ref()
            .map(|mapping| mapping.keys().copied().collect())
            .unwrap_or_default()
    }

    fn ready_mapping(&self) -> Result<&BTreeMap<usize, Vec<usize>>, M2nError> {
        if !self.connected {
            return Err(M2nError::NotConnected);
        }
        self.mapping
            .as_ref()
            .ok_or(M2nError::MissingDistribution(self.partition.mesh_id))
    }

    fn known_mapping(&self) -> Result<BTreeMap<usize, Vec<usize>>, M2nError> {
        let remote = self
            .partition
            .remote
            .as_ref()
            .ok_or(M2nError::MissingDistribution(self.partition.mesh_id))?;
        Ok(shared_positions(&self.partition.vertices, remote))
    }

    fn all_remote_ranks(&self) -> Vec<usize> {
        (0..self.partition.remote_size).collect()
    }

    fn check_len(&self, len: usize, dimension: usize) -> Result<(), M2nError> {
        let expected = self.partition.vertices.len() * dimension;
        if len != expected {
            return Err(M2nError::SizeMismatch {
                mesh: self.partition.mesh_id,
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedCommunication for PointToPointCommunication {
    fn mesh_id(&self) -> MeshId {
        self.partition.mesh_id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn accept_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        let mapping = self.known_mapping()?;
        let ranks: Vec<usize> = mapping.keys().copied().collect();
        self.com
            .accept_connection(acceptor, requester, self.partition.rank, &ranks)
            .await?;
        self.mapping = Some(mapping);
        self.connected = true;
        info!(mesh = %self.partition.mesh_id, ?ranks, "accepted point-to-point connection");
        Ok(())
    }

    async fn request_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        let mapping = self.known_mapping()?;
        let ranks: Vec<usize> = mapping.keys().copied().collect();
        self.com
            .request_connection(acceptor, requester, self.partition.rank, &ranks)
            .await?;
        self.mapping = Some(mapping);
        self.connected = true;
        info!(mesh = %self.partition.mesh_id, ?ranks, "requested point-to-point connection");
        Ok(())
    }

    async fn accept_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::accept_pre_connection: called");
        let ranks = self.all_remote_ranks();
        self.com
            .accept_connection(acceptor, requester, self.partition.rank, &ranks)
            .await?;
        self.mapping = None;
        self.connected = true;
        Ok(())
    }

    async fn request_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::request_pre_connection: called");
        let ranks = self.all_remote_ranks();
        self.com
            .request_connection(acceptor, requester, self.partition.rank, &ranks)
            .await?;
        self.mapping = None;
        self.connected = true;
        Ok(())
    }

    async fn broadcast_send_local_mesh(&mut self) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::broadcast_send_local_mesh: called");
        for rank in self.com.remote_ranks() {
            self.com.send_indices(&self.partition.vertices, rank).await?;
        }
        Ok(())
    }

    async fn broadcast_receive_local_mesh(&mut self) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::broadcast_receive_local_mesh: called");
        let mut remote = VertexDistribution::new();
        for rank in self.com.remote_ranks() {
            let vertices = self.com.receive_indices(rank).await?;
            remote.insert(rank, vertices);
        }
        self.mapping = Some(shared_positions(&self.partition.vertices, &remote));
        self.partition.remote_size = remote.size();
        self.partition.remote = Some(remote);
        Ok(())
    }

    async fn send_communication_map(&mut self) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::send_communication_map: called");
        let mapping = self.known_mapping()?;
        for rank in self.com.remote_ranks() {
            let globals: Vec<usize> = mapping
                .get(&rank)
                .map(|positions| positions.iter().map(|&pos| self.partition.vertices[pos]).collect())
                .unwrap_or_default();
            self.com.send_indices(&globals, rank).await?;
        }
        self.mapping = Some(mapping);
        Ok(())
    }

    async fn receive_communication_map(&mut self) -> Result<(), M2nError> {
        debug!(mesh = %self.partition.mesh_id, "PointToPointCommunication::receive_communication_map: called");
        let index: BTreeMap<usize, usize> = self
            .partition
            .vertices
            .iter()
            .enumerate()
            .map(|(pos, &g)| (g, pos))
            .collect();
        let mut mapping = BTreeMap::new();
        for rank in self.com.remote_ranks() {
            let globals = self.com.receive_indices(rank).await?;
            if globals.is_empty() {
                continue;
            }
            let positions = globals
                .iter()
                .map(|g| {
                    index.get(g).copied().ok_or(M2nError::ForeignVertex {
                        mesh: self.partition.mesh_id,
                        remote_rank: rank,
                        vertex: *g,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            mapping.insert(rank, positions);
        }
        self.mapping = Some(mapping);
        Ok(())
    }

    async fn send(&mut self, values: &[f64], dimension: usize) -> Result<(), M2nError> {
        self.check_len(values.len(), dimension)?;
        let mapping = self.ready_mapping()?;
        for (&rank, positions) in mapping {
            let buffer: Vec<f64> = positions
                .iter()
                .flat_map(|&pos| values[pos * dimension..(pos + 1) * dimension].iter().copied())
                .collect();
            self.com.send_doubles(&buffer, rank).await?;
        }
        Ok(())
    }

    async fn receive(&mut self, values: &mut [f64], dimension: usize) -> Result<(), M2nError> {
        self.check_len(values.len(), dimension)?;
        if !self.connected {
            return Err(M2nError::NotConnected);
        }
        // borrow the fields separately; receiving needs the transport mutably
        let mapping = self
            .mapping
            .as_ref()
            .ok_or(M2nError::MissingDistribution(self.partition.mesh_id))?;
        for (&rank, positions) in mapping {
            let buffer = self.com.receive_doubles(rank).await?;
            let expected = positions.len() * dimension;
            if buffer.len() != expected {
                return Err(M2nError::SizeMismatch {
                    mesh: self.partition.mesh_id,
                    expected,
                    actual: buffer.len(),
                });
            }
            for (chunk, &pos) in buffer.chunks(dimension.max(1)).zip(positions) {
                values[pos * dimension..(pos + 1) * dimension].copy_from_slice(chunk);
            }
        }
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<(), M2nError> {
        self.com.close_connection().await?;
        self.connected = false;
        Ok(())
    }
}

/// Builds point-to-point communications on top of any transport
pub struct PointToPointComFactory {
    transport: Arc<dyn CommunicationFactory>,
}

impl PointToPointComFactory {
    pub fn new(transport: Arc<dyn CommunicationFactory>) -> Self {
        Self { transport }
    }
}

impl DistributedComFactory for PointToPointComFactory {
    fn new_distributed_communication(&self, partition: MeshPartition) -> Box<dyn DistributedCommunication> {
        let scope = format!("p2p-{}", partition.mesh_id);
        let com = self.transport.new_communication(&scope);
        Box::new(PointToPointCommunication::new(partition, com))
    }
}
