//! Mesh construction utilities.
//!
//! This module builds half-edge connectivity from face-vertex lists and
//! implements the double construction that turns a mesh with boundary into a
//! closed mesh carrying an orientation-reversing involution.

use std::collections::HashMap;

use nalgebra::Point3;

use super::connectivity::{Connectivity, Edge, Face, HalfEdge, Vertex};
use super::index::{EdgeId, FaceId, HalfEdgeId, MeshIndex, VertexId};
use crate::error::{MetricError, Result};

/// Build half-edge connectivity from triangle faces.
///
/// The mesh must be closed (every edge shared by exactly two faces) and
/// manifold. Meshes with boundary should be passed through [`closed_double`]
/// instead.
///
/// # Arguments
/// * `faces` - List of triangle faces, each as `[v0, v1, v2]` indices
/// * `num_vertices` - Number of vertices referenced by the faces
///
/// # Example
/// ```
/// use flatiron::mesh::{build_from_triangles, Connectivity};
///
/// let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
/// let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
/// assert_eq!(mesh.num_edges(), 6);
/// ```
pub fn build_from_triangles<I: MeshIndex>(
    faces: &[[usize; 3]],
    num_vertices: usize,
) -> Result<Connectivity<I>> {
    if faces.is_empty() {
        return Err(MetricError::EmptyMesh);
    }

    // Validate vertex indices and reject degenerate faces
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= num_vertices {
                return Err(MetricError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(MetricError::DegenerateFace { face: fi });
        }
    }

    let mut mesh = Connectivity::new();
    mesh.vertices = vec![
        Vertex {
            halfedge: HalfEdgeId::invalid(),
        };
        num_vertices
    ];
    mesh.halfedges = Vec::with_capacity(3 * faces.len());
    mesh.faces = Vec::with_capacity(faces.len());

    // Map from directed edge (v0, v1) to half-edge ID
    let mut edge_map: HashMap<(usize, usize), HalfEdgeId<I>> = HashMap::new();

    // First pass: create all half-edges and faces
    for face in faces {
        let face_id = FaceId::<I>::new(mesh.faces.len());
        let base = mesh.halfedges.len();
        let hes = [
            HalfEdgeId::<I>::new(base),
            HalfEdgeId::<I>::new(base + 1),
            HalfEdgeId::<I>::new(base + 2),
        ];
        mesh.faces.push(Face { halfedge: hes[0] });

        for k in 0..3 {
            let v0 = face[k];
            let v1 = face[(k + 1) % 3];
            let mut he = HalfEdge::new();
            he.origin = VertexId::new(v0);
            he.next = hes[(k + 1) % 3];
            he.prev = hes[(k + 2) % 3];
            he.face = face_id;
            mesh.halfedges.push(he);

            mesh.vertices[v0].halfedge = hes[k];

            if edge_map.insert((v0, v1), hes[k]).is_some() {
                return Err(MetricError::NonManifold {
                    details: format!("directed edge ({}, {}) appears twice", v0, v1),
                });
            }
        }
    }

    // Second pass: link twins and build the edge list. Iterating half-edges
    // in creation order keeps edge numbering deterministic.
    for h_idx in 0..mesh.num_halfedges() {
        let he = HalfEdgeId::<I>::new(h_idx);
        if mesh.halfedge(he).edge.is_valid() {
            continue;
        }
        let v0 = mesh.origin(he).index();
        let v1 = mesh.origin(mesh.next(he)).index();
        let twin = edge_map.get(&(v1, v0)).copied().ok_or_else(|| MetricError::NonManifold {
            details: format!("edge ({}, {}) is on the boundary; the mesh is not closed", v0, v1),
        })?;
        let e = EdgeId::<I>::new(mesh.edges.len());
        mesh.edges.push(Edge { halfedge: he });
        mesh.halfedge_mut(he).twin = twin;
        mesh.halfedge_mut(he).edge = e;
        mesh.halfedge_mut(twin).twin = he;
        mesh.halfedge_mut(twin).edge = e;
    }

    // Isolated vertices have no outgoing half-edge and break traversal.
    for (vi, v) in mesh.vertices.iter().enumerate() {
        if !v.halfedge.is_valid() {
            return Err(MetricError::NonManifold {
                details: format!("vertex {} is isolated", vi),
            });
        }
    }

    Ok(mesh)
}

/// Result of [`closed_double`]: a closed mesh plus the map back to the input
/// vertex order.
#[derive(Debug, Clone)]
pub struct ClosedMesh<I: MeshIndex = u32> {
    /// The closed connectivity (the input itself, or its double).
    pub mesh: Connectivity<I>,
    /// `vtx_reindex[internal] = original`: maps internal vertex indices to
    /// the input vertex order. Interior copies map to the vertex they mirror.
    pub vtx_reindex: Vec<usize>,
    /// For each internal vertex, whether it lies on the glued boundary.
    pub on_boundary: Vec<bool>,
}

/// Build closed connectivity from triangle faces, doubling across the
/// boundary when one is present.
///
/// A closed input passes through unchanged (identity reindexing, no mirror).
/// An input with boundary is glued to a mirrored copy of itself along the
/// boundary: interior vertices are duplicated, boundary vertices are shared,
/// and mirrored faces reverse orientation. The resulting
/// [`Connectivity::mirror_of`] involution identifies each half-edge with its
/// reflection, which the metric layer uses to share one coordinate per edge
/// orbit.
pub fn closed_double<I: MeshIndex>(
    faces: &[[usize; 3]],
    num_vertices: usize,
) -> Result<ClosedMesh<I>> {
    if faces.is_empty() {
        return Err(MetricError::EmptyMesh);
    }

    // Count undirected edge multiplicities to find the boundary.
    let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
    for (fi, face) in faces.iter().enumerate() {
        for k in 0..3 {
            let v0 = face[k];
            let v1 = face[(k + 1) % 3];
            if v0 >= num_vertices || v1 >= num_vertices {
                return Err(MetricError::InvalidVertexIndex {
                    face: fi,
                    vertex: v0.max(v1),
                });
            }
            let key = if v0 < v1 { (v0, v1) } else { (v1, v0) };
            *edge_count.entry(key).or_insert(0) += 1;
        }
    }

    let mut is_boundary = vec![false; num_vertices];
    let mut has_boundary = false;
    for (&(v0, v1), &count) in &edge_count {
        if count == 1 {
            is_boundary[v0] = true;
            is_boundary[v1] = true;
            has_boundary = true;
        } else if count > 2 {
            return Err(MetricError::NonManifold {
                details: format!("edge ({}, {}) has {} incident faces", v0, v1, count),
            });
        }
    }

    if !has_boundary {
        let mesh = build_from_triangles(faces, num_vertices)?;
        return Ok(ClosedMesh {
            mesh,
            vtx_reindex: (0..num_vertices).collect(),
            on_boundary: vec![false; num_vertices],
        });
    }

    // Mirror copies of interior vertices; boundary vertices are shared.
    let mut mirror_index = vec![usize::MAX; num_vertices];
    let mut vtx_reindex: Vec<usize> = (0..num_vertices).collect();
    let mut on_boundary = is_boundary.clone();
    for v in 0..num_vertices {
        if is_boundary[v] {
            mirror_index[v] = v;
        } else {
            mirror_index[v] = vtx_reindex.len();
            vtx_reindex.push(v);
            on_boundary.push(false);
        }
    }

    for (fi, face) in faces.iter().enumerate() {
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(MetricError::DegenerateFace { face: fi });
        }
    }

    let num_faces = faces.len();
    let mut doubled = Vec::with_capacity(2 * num_faces);
    doubled.extend_from_slice(faces);
    for face in faces {
        // Orientation reverses under reflection.
        doubled.push([mirror_index[face[0]], mirror_index[face[2]], mirror_index[face[1]]]);
    }

    // The double cannot be built by vertex-pair matching: an interior edge
    // whose endpoints both lie on the boundary (a disk's diagonal, say)
    // appears once per copy, giving a legitimate parallel edge pair. Instead
    // the half-edges are created face by face and glued explicitly: twins
    // within each copy by that copy's own directed-edge map, and boundary
    // half-edges to their mirror image in the other copy.
    let mut mesh: Connectivity<I> = Connectivity::new();
    mesh.vertices = vec![
        Vertex {
            halfedge: HalfEdgeId::invalid(),
        };
        vtx_reindex.len()
    ];
    mesh.halfedges = Vec::with_capacity(6 * num_faces);
    mesh.faces = Vec::with_capacity(2 * num_faces);

    let mut copy_maps: [HashMap<(usize, usize), HalfEdgeId<I>>; 2] =
        [HashMap::new(), HashMap::new()];
    for (fi, face) in doubled.iter().enumerate() {
        let face_id = FaceId::<I>::new(fi);
        let base = mesh.halfedges.len();
        let hes = [
            HalfEdgeId::<I>::new(base),
            HalfEdgeId::<I>::new(base + 1),
            HalfEdgeId::<I>::new(base + 2),
        ];
        mesh.faces.push(Face { halfedge: hes[0] });

        let map = &mut copy_maps[fi / num_faces];
        for k in 0..3 {
            let v0 = face[k];
            let v1 = face[(k + 1) % 3];
            let mut he = HalfEdge::new();
            he.origin = VertexId::new(v0);
            he.next = hes[(k + 1) % 3];
            he.prev = hes[(k + 2) % 3];
            he.face = face_id;
            mesh.halfedges.push(he);
            mesh.vertices[v0].halfedge = hes[k];

            if map.insert((v0, v1), hes[k]).is_some() {
                return Err(MetricError::NonManifold {
                    details: format!("directed edge ({}, {}) appears twice", v0, v1),
                });
            }
        }
    }

    // Twins: within a copy when the reversed directed edge exists there,
    // otherwise across the boundary to the mirror half-edge (half-edge k of
    // face i mirrors half-edge 2 - k of face num_faces + i).
    for h_idx in 0..mesh.num_halfedges() {
        let he = HalfEdgeId::<I>::new(h_idx);
        if mesh.halfedge(he).twin.is_valid() {
            continue;
        }
        let (fi, k) = (h_idx / 3, h_idx % 3);
        let v0 = mesh.origin(he).index();
        let v1 = mesh.origin(mesh.next(he)).index();
        let twin = match copy_maps[fi / num_faces].get(&(v1, v0)) {
            Some(&t) => t,
            None => {
                let mi = if fi < num_faces { fi + num_faces } else { fi - num_faces };
                HalfEdgeId::new(3 * mi + (2 - k))
            }
        };
        let e = EdgeId::<I>::new(mesh.edges.len());
        mesh.edges.push(Edge { halfedge: he });
        mesh.halfedge_mut(he).twin = twin;
        mesh.halfedge_mut(he).edge = e;
        mesh.halfedge_mut(twin).twin = he;
        mesh.halfedge_mut(twin).edge = e;
    }

    // Half-edge k of face i (created in order, three per face) mirrors
    // half-edge (2 - k) of face num_faces + i.
    let mut mirror_halfedge = vec![HalfEdgeId::<I>::invalid(); mesh.num_halfedges()];
    for i in 0..num_faces {
        for k in 0..3 {
            let h = 3 * i + k;
            let hm = 3 * (num_faces + i) + (2 - k);
            mirror_halfedge[h] = HalfEdgeId::new(hm);
            mirror_halfedge[hm] = HalfEdgeId::new(h);
        }
    }
    let mirror_vertex = (0..mesh.num_vertices())
        .map(|v| {
            let orig = vtx_reindex[v];
            if is_boundary[orig] {
                VertexId::new(v)
            } else if v < num_vertices {
                VertexId::new(mirror_index[orig])
            } else {
                VertexId::new(orig)
            }
        })
        .collect();

    mesh.mirror_halfedge = Some(mirror_halfedge);
    mesh.mirror_vertex = Some(mirror_vertex);

    Ok(ClosedMesh {
        mesh,
        vtx_reindex,
        on_boundary,
    })
}

/// Compute per-edge Euclidean lengths from vertex positions.
///
/// Positions are indexed in the *input* vertex order; `vtx_reindex` maps
/// internal vertices back to it, so doubled meshes automatically assign
/// mirrored edges identical lengths.
pub fn edge_lengths_from_positions<I: MeshIndex>(
    mesh: &Connectivity<I>,
    positions: &[Point3<f64>],
    vtx_reindex: &[usize],
) -> Result<Vec<f64>> {
    let mut lengths = Vec::with_capacity(mesh.num_edges());
    for e in mesh.edge_ids() {
        let (a, b) = mesh.edge_endpoints(e);
        let pa = positions[vtx_reindex[a.index()]];
        let pb = positions[vtx_reindex[b.index()]];
        let len = (pa - pb).norm();
        if !(len > 0.0) || !len.is_finite() {
            return Err(MetricError::NumericalDegeneracy {
                face: mesh.face_of(mesh.edge_halfedge(e)).index(),
            });
        }
        lengths.push(len);
    }
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_closed() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
        assert!(mesh.is_valid());
        assert!(!mesh.is_doubled());
    }

    #[test]
    fn test_build_rejects_boundary() {
        let faces = vec![[0, 1, 2]];
        let result: Result<Connectivity> = build_from_triangles(&faces, 3);
        assert!(matches!(result, Err(MetricError::NonManifold { .. })));
    }

    #[test]
    fn test_build_rejects_degenerate_face() {
        let faces = vec![[0, 1, 1]];
        let result: Result<Connectivity> = build_from_triangles(&faces, 2);
        assert!(matches!(result, Err(MetricError::DegenerateFace { face: 0 })));
    }

    #[test]
    fn test_closed_double_passthrough() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let closed: ClosedMesh = closed_double(&faces, 4).unwrap();
        assert_eq!(closed.mesh.num_faces(), 4);
        assert_eq!(closed.vtx_reindex, vec![0, 1, 2, 3]);
        assert!(!closed.mesh.is_doubled());
    }

    #[test]
    fn test_closed_double_of_square() {
        // A unit square split into two triangles: 4 boundary vertices.
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        let closed: ClosedMesh = closed_double(&faces, 4).unwrap();
        let mesh = &closed.mesh;

        // All four vertices are on the boundary, so no copies are added.
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 4);
        assert!(mesh.is_valid());
        assert!(mesh.is_doubled());
        // Sphere topology: V - E + F = 4 - 6 + 4 = 2.
        assert_eq!(mesh.euler_characteristic(), 2);

        // The mirror involution maps every half-edge to one with swapped
        // endpoints.
        for h in mesh.halfedge_ids() {
            let hm = mesh.mirror_of(h).unwrap();
            let vm = |v: VertexId| mesh.vertex_mirror_of(v).unwrap();
            assert_eq!(vm(mesh.origin(h)), mesh.dest(hm));
            assert_eq!(vm(mesh.dest(h)), mesh.origin(hm));
            assert_eq!(mesh.mirror_of(hm).unwrap(), h);
        }
    }

    #[test]
    fn test_closed_double_interior_vertex() {
        // A fan of four triangles around an interior vertex 0, boundary 1..=4.
        let faces = vec![[0, 1, 2], [0, 2, 3], [0, 3, 4], [0, 4, 1]];
        let closed: ClosedMesh = closed_double(&faces, 5).unwrap();
        let mesh = &closed.mesh;

        // Interior vertex is duplicated; the four rim vertices are shared.
        assert_eq!(mesh.num_vertices(), 6);
        assert_eq!(mesh.num_faces(), 8);
        assert_eq!(closed.vtx_reindex, vec![0, 1, 2, 3, 4, 0]);
        assert!(mesh.is_valid());
        assert_eq!(mesh.euler_characteristic(), 2);

        let m0 = mesh.vertex_mirror_of(VertexId::new(0)).unwrap();
        assert_eq!(m0.index(), 5);
        let m1 = mesh.vertex_mirror_of(VertexId::new(1)).unwrap();
        assert_eq!(m1.index(), 1);
    }

    #[test]
    fn test_edge_lengths_from_positions() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let reindex: Vec<usize> = (0..4).collect();
        let lengths = edge_lengths_from_positions(&mesh, &positions, &reindex).unwrap();
        assert_eq!(lengths.len(), 6);
        for &l in &lengths {
            assert!(l > 0.0);
        }
    }
}
