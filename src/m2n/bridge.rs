//! M2N bridge between two participants

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::distributed::{DistributedComFactory, DistributedCommunication};
use super::error::M2nError;
use super::partition::MeshPartition;
use crate::com::Communication;
use crate::mesh::MeshId;

/// Connects the ranks of this participant with the ranks of the remote one
///
/// The master communication links rank 0 on each side and carries scalar
/// control values. One distributed communication per mesh carries field data
/// between all ranks.
pub struct M2N {
    master_com: Box<dyn Communication>,
    factory: Arc<dyn DistributedComFactory>,
    dist_coms: BTreeMap<MeshId, Box<dyn DistributedCommunication>>,
    is_master_connected: bool,
    are_slaves_connected: bool,
}

impl M2N {
    pub fn new(master_com: Box<dyn Communication>, factory: Arc<dyn DistributedComFactory>) -> Self {
        debug!("M2N::new: called");
        Self {
            master_com,
            factory,
            dist_coms: BTreeMap::new(),
            is_master_connected: false,
            are_slaves_connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_master_connected
    }

    pub fn are_slaves_connected(&self) -> bool {
        self.are_slaves_connected
    }

    pub async fn accept_master_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::accept_master_connection: called");
        if self.is_master_connected {
            return Err(M2nError::AlreadyConnected);
        }
        self.master_com.accept_connection(acceptor, requester, 0, &[0]).await?;
        self.is_master_connected = true;
        info!(%acceptor, %requester, "master connection accepted");
        Ok(())
    }

    pub async fn request_master_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::request_master_connection: called");
        if self.is_master_connected {
            return Err(M2nError::AlreadyConnected);
        }
        self.master_com.request_connection(acceptor, requester, 0, &[0]).await?;
        self.is_master_connected = true;
        info!(%acceptor, %requester, "master connection requested");
        Ok(())
    }

    pub async fn accept_slaves_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::accept_slaves_connection: called");
        for com in self.dist_coms.values_mut() {
            com.accept_connection(acceptor, requester).await?;
        }
        self.update_slaves_connected();
        Ok(())
    }

    pub async fn request_slaves_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::request_slaves_connection: called");
        for com in self.dist_coms.values_mut() {
            com.request_connection(acceptor, requester).await?;
        }
        self.update_slaves_connected();
        Ok(())
    }

    pub async fn accept_slaves_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::accept_slaves_pre_connection: called");
        for com in self.dist_coms.values_mut() {
            com.accept_pre_connection(acceptor, requester).await?;
        }
        self.update_slaves_connected();
        Ok(())
    }

    pub async fn request_slaves_pre_connection(&mut self, acceptor: &str, requester: &str) -> Result<(), M2nError> {
        debug!(%acceptor, %requester, "M2N::request_slaves_pre_connection: called");
        for com in self.dist_coms.values_mut() {
            com.request_pre_connection(acceptor, requester).await?;
        }
        self.update_slaves_connected();
        Ok(())
    }

    pub async fn broadcast_send_local_mesh(&mut self, mesh_id: MeshId) -> Result<(), M2nError> {
        self.dist_com(mesh_id)?.broadcast_send_local_mesh().await
    }

    pub async fn broadcast_receive_local_mesh(&mut self, mesh_id: MeshId) -> Result<(), M2nError> {
        self.dist_com(mesh_id)?.broadcast_receive_local_mesh().await
    }

    pub async fn send_communication_map(&mut self, mesh_id: MeshId) -> Result<(), M2nError> {
        self.dist_com(mesh_id)?.send_communication_map().await
    }

    pub async fn receive_communication_map(&mut self, mesh_id: MeshId) -> Result<(), M2nError> {
        self.dist_com(mesh_id)?.receive_communication_map().await
    }

    /// Tears down every connection. Safe to call repeatedly.
    pub async fn close_connection(&mut self) -> Result<(), M2nError> {
        debug!("M2N::close_connection: called");
        if self.is_master_connected {
            self.master_com.close_connection().await?;
            self.is_master_connected = false;
        }
        for com in self.dist_coms.values_mut() {
            com.close_connection().await?;
        }
        self.are_slaves_connected = false;
        Ok(())
    }

    pub fn create_distributed_communication(&mut self, partition: MeshPartition) -> Result<(), M2nError> {
        let mesh_id = partition.mesh_id;
        debug!(%mesh_id, "M2N::create_distributed_communication: called");
        if self.dist_coms.contains_key(&mesh_id) {
            return Err(M2nError::DuplicateMesh(mesh_id));
        }
        let com = self.factory.new_distributed_communication(partition);
        self.dist_coms.insert(mesh_id, com);
        Ok(())
    }

    pub async fn send(&mut self, values: &[f64], mesh_id: MeshId, dimension: usize) -> Result<(), M2nError> {
        debug!(%mesh_id, len = values.len(), dimension, "M2N::send: called");
        self.dist_com(mesh_id)?.send(values, dimension).await
    }

    pub async fn receive(&mut self, values: &mut [f64], mesh_id: MeshId, dimension: usize) -> Result<(), M2nError> {
        debug!(%mesh_id, len = values.len(), dimension, "M2N::receive: called");
        self.dist_com(mesh_id)?.receive(values, dimension).await
    }

    pub async fn send_bool(&mut self, value: bool) -> Result<(), M2nError> {
        self.ensure_master()?;
        self.master_com.send_bool(value, 0).await?;
        Ok(())
    }

    pub async fn receive_bool(&mut self) -> Result<bool, M2nError> {
        self.ensure_master()?;
        Ok(self.master_com.receive_bool(0).await?)
    }

    pub async fn send_double(&mut self, value: f64) -> Result<(), M2nError> {
        self.ensure_master()?;
        self.master_com.send_double(value, 0).await?;
        Ok(())
    }

    pub async fn receive_double(&mut self) -> Result<f64, M2nError> {
        self.ensure_master()?;
        Ok(self.master_com.receive_double(0).await?)
    }

    fn ensure_master(&self) -> Result<(), M2nError> {
        if !self.is_master_connected {
            return Err(M2nError::NotConnected);
        }
        Ok(())
    }

    fn dist_com(&mut self, mesh_id: MeshId) -> Result<&mut Box<dyn DistributedCommunication>, M2nError> {
        self.dist_coms.get_mut(&mesh_id).ok_or(M2nError::UnknownMesh(mesh_id))
    }

    fn update_slaves_connected(&mut self) {
        self.are_slaves_connected =
            !self.dist_coms.is_empty() && self.dist_coms.values().all(|com| com.is_connected());
    }
}

impl Drop for M2N {
    fn drop(&mut self) {
        if self.is_master_connected {
            warn!("M2N dropped while connected; channels are released without a close handshake");
        }
    }
}
