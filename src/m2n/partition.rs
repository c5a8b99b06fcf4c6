//! Vertex ownership across ranks

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::mesh::MeshId;

/// Global vertex indices owned by each rank of one participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexDistribution(BTreeMap<usize, Vec<usize>>);

impl VertexDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `count` global vertices into contiguous blocks over `ranks` ranks.
    /// Earlier ranks take the remainder.
    pub fn contiguous(count: usize, ranks: usize) -> Self {
        let ranks = ranks.max(1);
        let base = count / ranks;
        let extra = count % ranks;
        let mut start = 0;
        let mut map = BTreeMap::new();
        for rank in 0..ranks {
            let len = base + usize::from(rank < extra);
            map.insert(rank, (start..start + len).collect());
            start += len;
        }
        Self(map)
    }

    pub fn insert(&mut self, rank: usize, vertices: Vec<usize>) {
        self.0.insert(rank, vertices);
    }

    pub fn vertices(&self, rank: usize) -> &[usize] {
        self.0.get(&rank).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.keys().copied()
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(usize, Vec<usize>)> for VertexDistribution {
    fn from_iter<I: IntoIterator<Item = (usize, Vec<usize>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What one rank knows about a mesh before connecting its distributed communication
#[derive(Debug, Clone, PartialEq)]
pub struct MeshPartition {
    pub mesh_id: MeshId,
    pub rank: usize,
    /// Global index of each local vertex, in local storage order
    pub vertices: Vec<usize>,
    /// Remote participant's vertex ownership, if already known
    pub remote: Option<VertexDistribution>,
    pub remote_size: usize,
}

impl MeshPartition {
    pub fn new(mesh_id: MeshId, rank: usize, vertices: Vec<usize>, remote_size: usize) -> Self {
        Self {
            mesh_id,
            rank,
            vertices,
            remote: None,
            remote_size,
        }
    }

    /// Single-rank partition covering `count` vertices, paired with a single remote rank
    pub fn serial(mesh_id: MeshId, count: usize) -> Self {
        Self::new(mesh_id, 0, (0..count).collect(), 1).with_remote(VertexDistribution::contiguous(count, 1))
    }

    pub fn with_remote(mut self, remote: VertexDistribution) -> Self {
        self.remote_size = remote.size();
        self.remote = Some(remote);
        self
    }
}

/// For each remote rank, the local storage positions of the shared vertices,
/// ordered by ascending global index so both sides agree on the layout.
pub(crate) fn shared_positions(local: &[usize], remote: &VertexDistribution) -> BTreeMap<usize, Vec<usize>> {
    let index: HashMap<usize, usize> = local.iter().enumerate().map(|(pos, &g)| (g, pos)).collect();
    remote
        .ranks()
        .filter_map(|rank| {
            let mut shared: Vec<(usize, usize)> = remote
                .vertices(rank)
                .iter()
                .filter_map(|g| index.get(g).map(|&pos| (*g, pos)))
                .collect();
            shared.sort_unstable();
            shared.dedup();
            (!shared.is_empty()).then(|| (rank, shared.into_iter().map(|(_, pos)| pos).collect()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_split() {
        let dist = VertexDistribution::contiguous(5, 2);
        assert_eq!(dist.vertices(0), &[0, 1, 2]);
        assert_eq!(dist.vertices(1), &[3, 4]);
        assert_eq!(dist.size(), 2);
        assert!(dist.vertices(7).is_empty());
    }

    #[test]
    fn test_shared_positions_sorted_by_global_index() {
        // local storage order differs from global order
        let local = vec![9, 2, 5, 4];
        let remote: VertexDistribution = [(0, vec![4, 2]), (1, vec![5, 9, 11]), (2, vec![100])].into_iter().collect();

        let map = shared_positions(&local, &remote);
        assert_eq!(map.get(&0), Some(&vec![1, 3]));
        assert_eq!(map.get(&1), Some(&vec![2, 0]));
        assert!(!map.contains_key(&2));
    }

    #[test]
    fn test_serial_partition() {
        let p = MeshPartition::serial(MeshId(3), 4);
        assert_eq!(p.vertices, vec![0, 1, 2, 3]);
        assert_eq!(p.remote_size, 1);
        assert_eq!(p.remote.as_ref().map(|r| r.vertices(0).len()), Some(4));
    }
}
