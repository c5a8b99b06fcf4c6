//! M2N error types

use thiserror::Error;

use crate::com::ComError;
use crate::mesh::MeshId;

#[derive(Debug, Error)]
pub enum M2nError {
    #[error(transparent)]
    Com(#[from] ComError),

    #[error("Master connection is not established")]
    NotConnected,

    #[error("Master connection is already established")]
    AlreadyConnected,

    #[error("No distributed communication for {0}")]
    UnknownMesh(MeshId),

    #[error("Distributed communication for {0} already exists")]
    DuplicateMesh(MeshId),

    #[error("Remote vertex distribution for {0} is unknown")]
    MissingDistribution(MeshId),

    #[error("Remote rank {remote_rank} references vertex {vertex} which is not local to {mesh}")]
    ForeignVertex {
        mesh: MeshId,
        remote_rank: usize,
        vertex: usize,
    },

    #[error("Expected {expected} values for {mesh}, got {actual}")]
    SizeMismatch {
        mesh: MeshId,
        expected: usize,
        actual: usize,
    },
}
