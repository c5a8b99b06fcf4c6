//! Mesh data buffers
//!
//! Mesh geometry is owned by the solvers. What the coupling layer needs is a
//! set of named, dimensioned value buffers per mesh, addressed by [`DataId`].
//! The scheme never owns these buffers: it borrows them through
//! [`DataProvider`] on every call that reads or writes coupling values.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies a mesh within one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub usize);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh{}", self.0)
    }
}

/// Identifies a data field: the owning mesh plus its index on that mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataId {
    pub mesh: MeshId,
    pub index: usize,
}

impl DataId {
    pub fn new(mesh: MeshId, index: usize) -> Self {
        Self { mesh, index }
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/data{}", self.mesh, self.index)
    }
}

/// Access to the value buffers the scheme exchanges
pub trait DataProvider {
    fn values(&self, id: DataId) -> Option<&[f64]>;
    fn values_mut(&mut self, id: DataId) -> Option<&mut [f64]>;
}

/// One data field: `vertex_count * dimension` values laid out vertex-major
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    id: DataId,
    name: String,
    dimension: usize,
    values: Vec<f64>,
}

impl MeshData {
    pub fn id(&self) -> DataId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn mesh_id(&self) -> MeshId {
        self.id.mesh
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    id: MeshId,
    name: String,
    vertex_count: usize,
    data: Vec<MeshData>,
}

impl Mesh {
    pub fn new(id: MeshId, name: impl Into<String>, vertex_count: usize) -> Self {
        let name = name.into();
        debug!(%id, %name, vertex_count, "Mesh::new: called");
        Self {
            id,
            name,
            vertex_count,
            data: Vec::new(),
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Adds a zero-initialised data field and returns its id
    pub fn create_data(&mut self, name: impl Into<String>, dimension: usize) -> DataId {
        let id = DataId::new(self.id, self.data.len());
        let name = name.into();
        debug!(%id, %name, dimension, "Mesh::create_data: called");
        self.data.push(MeshData {
            id,
            name,
            dimension,
            values: vec![0.0; self.vertex_count * dimension],
        });
        id
    }

    pub fn data(&self, id: DataId) -> Option<&MeshData> {
        if id.mesh != self.id {
            return None;
        }
        self.data.get(id.index)
    }

    pub fn data_mut(&mut self, id: DataId) -> Option<&mut MeshData> {
        if id.mesh != self.id {
            return None;
        }
        self.data.get_mut(id.index)
    }

    pub fn data_by_name(&self, name: &str) -> Option<&MeshData> {
        self.data.iter().find(|d| d.name == name)
    }

    pub fn all_data(&self) -> &[MeshData] {
        &self.data
    }
}

impl DataProvider for Mesh {
    fn values(&self, id: DataId) -> Option<&[f64]> {
        self.data(id).map(MeshData::values)
    }

    fn values_mut(&mut self, id: DataId) -> Option<&mut [f64]> {
        self.data_mut(id).map(MeshData::values_mut)
    }
}

impl DataProvider for Vec<Mesh> {
    fn values(&self, id: DataId) -> Option<&[f64]> {
        self.iter().find(|m| m.id == id.mesh)?.values(id)
    }

    fn values_mut(&mut self, id: DataId) -> Option<&mut [f64]> {
        self.iter_mut().find(|m| m.id == id.mesh)?.values_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_data_allocates_per_dimension() {
        let mut mesh = Mesh::new(MeshId(0), "Interface", 4);
        let scalar = mesh.create_data("Pressure", 1);
        let vector = mesh.create_data("Forces", 3);

        assert_eq!(mesh.values(scalar).map(<[f64]>::len), Some(4));
        assert_eq!(mesh.values(vector).map(<[f64]>::len), Some(12));
        assert_eq!(vector, DataId::new(MeshId(0), 1));
        assert_eq!(mesh.data_by_name("Forces").map(MeshData::dimension), Some(3));
    }

    #[test]
    fn test_foreign_data_id_is_rejected() {
        let mut mesh = Mesh::new(MeshId(0), "A", 2);
        mesh.create_data("X", 1);
        assert!(mesh.values(DataId::new(MeshId(1), 0)).is_none());
        assert!(mesh.values_mut(DataId::new(MeshId(0), 5)).is_none());
    }

    #[test]
    fn test_vec_provider_routes_by_mesh() {
        let mut a = Mesh::new(MeshId(0), "A", 1);
        let mut b = Mesh::new(MeshId(1), "B", 2);
        let da = a.create_data("X", 1);
        let db = b.create_data("Y", 1);
        let mut meshes = vec![a, b];

        if let Some(values) = meshes.values_mut(db) {
            values.copy_from_slice(&[1.0, 2.0]);
        }
        assert_eq!(meshes.values(db), Some(&[1.0, 2.0][..]));
        assert_eq!(meshes.values(da), Some(&[0.0][..]));
    }
}
