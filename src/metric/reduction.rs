//! Reduction of per-edge coordinates to independent coordinates.
//!
//! On a plain closed mesh every edge carries its own coordinate. On a doubled
//! mesh the reflection involution identifies each edge with its mirror image,
//! and the pair shares a single coordinate. The [`ReductionMap`] records this
//! identification: reduced index per edge, and one representative edge per
//! reduced coordinate.

use nalgebra::DVector;

use crate::mesh::{Connectivity, EdgeId, MeshIndex};

/// Identification of mesh edges with independent (reduced) coordinates.
#[derive(Debug, Clone)]
pub struct ReductionMap {
    /// `edge_to_reduced[edge] = reduced coordinate index`.
    edge_to_reduced: Vec<usize>,
    /// One representative edge per reduced coordinate (the lower edge index
    /// of its orbit).
    representatives: Vec<usize>,
}

impl ReductionMap {
    /// Identity reduction: every edge is its own coordinate.
    pub fn identity(num_edges: usize) -> Self {
        Self {
            edge_to_reduced: (0..num_edges).collect(),
            representatives: (0..num_edges).collect(),
        }
    }

    /// Build the reduction for a mesh, pairing mirrored edges when the mesh
    /// is a double. Orbits are numbered by their lowest edge index, so the
    /// reduced ordering is deterministic.
    pub fn for_mesh<I: MeshIndex>(mesh: &Connectivity<I>) -> Self {
        if !mesh.is_doubled() {
            return Self::identity(mesh.num_edges());
        }

        let num_edges = mesh.num_edges();
        let mut edge_to_reduced = vec![usize::MAX; num_edges];
        let mut representatives = Vec::new();
        for e_idx in 0..num_edges {
            if edge_to_reduced[e_idx] != usize::MAX {
                continue;
            }
            let e = EdgeId::<I>::new(e_idx);
            let partner = mesh
                .edge_mirror_of(e)
                .expect("doubled mesh has an edge mirror")
                .index();
            let r = representatives.len();
            edge_to_reduced[e_idx] = r;
            edge_to_reduced[partner] = r;
            representatives.push(e_idx);
        }

        Self {
            edge_to_reduced,
            representatives,
        }
    }

    /// Number of reduced coordinates.
    #[inline]
    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    /// Whether the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    /// Number of mesh edges covered by the map.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edge_to_reduced.len()
    }

    /// Reduced coordinate index of an edge.
    #[inline]
    pub fn reduced(&self, edge: usize) -> usize {
        self.edge_to_reduced[edge]
    }

    /// Representative edge of a reduced coordinate.
    #[inline]
    pub fn representative(&self, reduced: usize) -> usize {
        self.representatives[reduced]
    }

    /// Expand a reduced coordinate vector to one value per mesh edge.
    pub fn expand(&self, reduced: &DVector<f64>) -> Vec<f64> {
        assert_eq!(reduced.len(), self.len(), "reduced coordinate dimension mismatch");
        self.edge_to_reduced.iter().map(|&r| reduced[r]).collect()
    }

    /// Gather per-edge values into a reduced vector by reading each orbit's
    /// representative. Orbit members are expected to carry equal values.
    pub fn reduce(&self, per_edge: &[f64]) -> DVector<f64> {
        assert_eq!(per_edge.len(), self.edge_to_reduced.len(), "edge value dimension mismatch");
        DVector::from_iterator(self.len(), self.representatives.iter().map(|&e| per_edge[e]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::closed_double;

    #[test]
    fn test_identity_reduction() {
        let map = ReductionMap::identity(5);
        assert_eq!(map.len(), 5);
        for e in 0..5 {
            assert_eq!(map.reduced(e), e);
            assert_eq!(map.representative(e), e);
        }
    }

    #[test]
    fn test_doubled_reduction_pairs_edges() {
        // Square disk: double is a sphere with 6 edges in orbits
        // {4 boundary edges fixed, diagonal paired with its copy}.
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        let closed = closed_double::<u32>(&faces, 4).unwrap();
        let map = ReductionMap::for_mesh(&closed.mesh);

        assert_eq!(map.num_edges(), closed.mesh.num_edges());
        // 6 edges, one mirrored pair -> 5 independent coordinates.
        assert_eq!(closed.mesh.num_edges(), 6);
        assert_eq!(map.len(), 5);

        // Orbit partners agree on the reduced index.
        for e in closed.mesh.edge_ids() {
            let partner = closed.mesh.edge_mirror_of(e).unwrap();
            assert_eq!(map.reduced(e.index()), map.reduced(partner.index()));
        }
    }

    #[test]
    fn test_expand_reduce_round_trip() {
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        let closed = closed_double::<u32>(&faces, 4).unwrap();
        let map = ReductionMap::for_mesh(&closed.mesh);

        let reduced = DVector::from_fn(map.len(), |i, _| i as f64 + 0.5);
        let per_edge = map.expand(&reduced);
        let back = map.reduce(&per_edge);
        assert_eq!(back, reduced);
    }
}
