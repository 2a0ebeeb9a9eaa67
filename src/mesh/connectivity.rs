//! Half-edge connectivity for closed triangle meshes.
//!
//! This module provides a half-edge (doubly-connected edge list) representation
//! for the combinatorics of a triangulated surface. It is purely topological:
//! geometry lives in the metric layer, which attaches one coordinate per edge.
//!
//! # Structure
//!
//! - Each edge is split into two **half-edges** pointing in opposite directions
//! - Each half-edge knows its **twin**, **next** and **prev** half-edges around
//!   the face, its **origin vertex**, its **face**, and its **edge**
//! - Each vertex stores one outgoing half-edge; each face and edge store one
//!   representative half-edge
//!
//! # Closedness
//!
//! Every half-edge has a valid twin and face: the structure represents closed
//! surfaces only. Meshes with boundary enter the system through the double
//! construction (see [`crate::mesh::closed_double`]), which glues a mirrored
//! copy along the boundary and records the resulting orientation-reversing
//! involution in [`Connectivity::mirror_halfedge`].
//!
//! # Flips
//!
//! [`Connectivity::flip_edge`] performs the combinatorial part of an edge flip:
//! it rewires the two triangles adjacent to an edge around the opposite
//! diagonal and reports the surrounding quad so the metric layer can update
//! the flipped coordinate consistently.

use super::index::{EdgeId, FaceId, HalfEdgeId, MeshIndex, VertexId};

/// A vertex in the half-edge mesh.
#[derive(Debug, Clone, Copy)]
pub struct Vertex<I: MeshIndex = u32> {
    /// One outgoing half-edge from this vertex.
    pub halfedge: HalfEdgeId<I>,
}

/// A half-edge in the mesh.
#[derive(Debug, Clone, Copy)]
pub struct HalfEdge<I: MeshIndex = u32> {
    /// The vertex this half-edge originates from.
    pub origin: VertexId<I>,

    /// The opposite half-edge (pointing in the reverse direction).
    pub twin: HalfEdgeId<I>,

    /// The next half-edge around the face (counter-clockwise).
    pub next: HalfEdgeId<I>,

    /// The previous half-edge around the face (clockwise).
    pub prev: HalfEdgeId<I>,

    /// The face this half-edge belongs to.
    pub face: FaceId<I>,

    /// The undirected edge this half-edge is one side of.
    pub edge: EdgeId<I>,
}

impl<I: MeshIndex> HalfEdge<I> {
    /// Create a new uninitialized half-edge.
    pub fn new() -> Self {
        Self {
            origin: VertexId::invalid(),
            twin: HalfEdgeId::invalid(),
            next: HalfEdgeId::invalid(),
            prev: HalfEdgeId::invalid(),
            face: FaceId::invalid(),
            edge: EdgeId::invalid(),
        }
    }
}

impl<I: MeshIndex> Default for HalfEdge<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// A face in the half-edge mesh.
#[derive(Debug, Clone, Copy)]
pub struct Face<I: MeshIndex = u32> {
    /// One half-edge on the boundary of this face.
    pub halfedge: HalfEdgeId<I>,
}

/// An undirected edge, identified by one of its two half-edges.
#[derive(Debug, Clone, Copy)]
pub struct Edge<I: MeshIndex = u32> {
    /// The canonical half-edge of this edge.
    pub halfedge: HalfEdgeId<I>,
}

/// The quad surrounding a flipped edge, reported by [`Connectivity::flip_edge`].
///
/// Before the flip the edge runs `v0 -> v1` with apex `v2` on one side and
/// `v3` on the other; after the flip it runs `v3 -> v2`. The four outer edges
/// are listed in the order expected by the Ptolemy relation: the products
/// `quad[0] * quad[2]` and `quad[1] * quad[3]` pair opposite sides.
#[derive(Debug, Clone, Copy)]
pub struct FlipQuad<I: MeshIndex = u32> {
    /// The flipped edge (its id is unchanged by the flip).
    pub edge: EdgeId<I>,
    /// Outer edges `[a, b, c, d]` with `a = {v1,v2}`, `b = {v2,v0}`,
    /// `c = {v0,v3}`, `d = {v3,v1}`.
    pub quad: [EdgeId<I>; 4],
    /// The quad corners `[v0, v1, v2, v3]` (old endpoints first, new last).
    pub vertices: [VertexId<I>; 4],
}

/// Half-edge connectivity of a closed triangle mesh.
#[derive(Debug, Clone)]
pub struct Connectivity<I: MeshIndex = u32> {
    /// All vertices in the mesh.
    pub(crate) vertices: Vec<Vertex<I>>,

    /// All half-edges in the mesh.
    pub(crate) halfedges: Vec<HalfEdge<I>>,

    /// All faces in the mesh.
    pub(crate) faces: Vec<Face<I>>,

    /// All undirected edges in the mesh.
    pub(crate) edges: Vec<Edge<I>>,

    /// For doubled meshes: the orientation-reversing involution on half-edges.
    pub(crate) mirror_halfedge: Option<Vec<HalfEdgeId<I>>>,

    /// For doubled meshes: the involution on vertices (boundary fixed points).
    pub(crate) mirror_vertex: Option<Vec<VertexId<I>>>,
}

impl<I: MeshIndex> Connectivity<I> {
    /// Create a new empty connectivity.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            halfedges: Vec::new(),
            faces: Vec::new(),
            edges: Vec::new(),
            mirror_halfedge: None,
            mirror_vertex: None,
        }
    }

    /// Number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of half-edges.
    #[inline]
    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len()
    }

    /// Number of faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Number of undirected edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The Euler characteristic V - E + F of the surface.
    #[inline]
    pub fn euler_characteristic(&self) -> i64 {
        self.num_vertices() as i64 - self.num_edges() as i64 + self.num_faces() as i64
    }

    /// Whether this mesh is a double of a mesh with boundary.
    #[inline]
    pub fn is_doubled(&self) -> bool {
        self.mirror_halfedge.is_some()
    }

    /// Iterate over all vertex ids.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId<I>> + '_ {
        (0..self.vertices.len()).map(VertexId::new)
    }

    /// Iterate over all half-edge ids.
    pub fn halfedge_ids(&self) -> impl Iterator<Item = HalfEdgeId<I>> + '_ {
        (0..self.halfedges.len()).map(HalfEdgeId::new)
    }

    /// Iterate over all face ids.
    pub fn face_ids(&self) -> impl Iterator<Item = FaceId<I>> + '_ {
        (0..self.faces.len()).map(FaceId::new)
    }

    /// Iterate over all edge ids.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId<I>> + '_ {
        (0..self.edges.len()).map(EdgeId::new)
    }

    /// Get a half-edge by id.
    #[inline]
    pub fn halfedge(&self, h: HalfEdgeId<I>) -> &HalfEdge<I> {
        &self.halfedges[h.index()]
    }

    #[inline]
    pub(crate) fn halfedge_mut(&mut self, h: HalfEdgeId<I>) -> &mut HalfEdge<I> {
        &mut self.halfedges[h.index()]
    }

    /// The origin vertex of a half-edge.
    #[inline]
    pub fn origin(&self, h: HalfEdgeId<I>) -> VertexId<I> {
        self.halfedge(h).origin
    }

    /// The destination vertex of a half-edge.
    #[inline]
    pub fn dest(&self, h: HalfEdgeId<I>) -> VertexId<I> {
        self.origin(self.twin(h))
    }

    /// The twin of a half-edge.
    #[inline]
    pub fn twin(&self, h: HalfEdgeId<I>) -> HalfEdgeId<I> {
        self.halfedge(h).twin
    }

    /// The next half-edge around the face.
    #[inline]
    pub fn next(&self, h: HalfEdgeId<I>) -> HalfEdgeId<I> {
        self.halfedge(h).next
    }

    /// The previous half-edge around the face.
    #[inline]
    pub fn prev(&self, h: HalfEdgeId<I>) -> HalfEdgeId<I> {
        self.halfedge(h).prev
    }

    /// The face a half-edge belongs to.
    #[inline]
    pub fn face_of(&self, h: HalfEdgeId<I>) -> FaceId<I> {
        self.halfedge(h).face
    }

    /// The undirected edge a half-edge belongs to.
    #[inline]
    pub fn edge_of(&self, h: HalfEdgeId<I>) -> EdgeId<I> {
        self.halfedge(h).edge
    }

    /// The canonical half-edge of an edge.
    #[inline]
    pub fn edge_halfedge(&self, e: EdgeId<I>) -> HalfEdgeId<I> {
        self.edges[e.index()].halfedge
    }

    /// The two endpoints of an edge.
    #[inline]
    pub fn edge_endpoints(&self, e: EdgeId<I>) -> (VertexId<I>, VertexId<I>) {
        let h = self.edge_halfedge(e);
        (self.origin(h), self.dest(h))
    }

    /// The three half-edges of a face, starting from its representative.
    #[inline]
    pub fn face_halfedges(&self, f: FaceId<I>) -> [HalfEdgeId<I>; 3] {
        let h0 = self.faces[f.index()].halfedge;
        let h1 = self.next(h0);
        let h2 = self.next(h1);
        [h0, h1, h2]
    }

    /// The three vertices of a face, in orientation order.
    #[inline]
    pub fn face_vertices(&self, f: FaceId<I>) -> [VertexId<I>; 3] {
        let [h0, h1, h2] = self.face_halfedges(f);
        [self.origin(h0), self.origin(h1), self.origin(h2)]
    }

    /// Collect the outgoing half-edges around a vertex.
    ///
    /// On a closed mesh this circulates via `twin(prev(h))`, which always
    /// terminates.
    pub fn outgoing_halfedges(&self, v: VertexId<I>) -> Vec<HalfEdgeId<I>> {
        let start = self.vertices[v.index()].halfedge;
        let mut out = Vec::new();
        let mut h = start;
        loop {
            out.push(h);
            h = self.twin(self.prev(h));
            if h == start {
                break;
            }
        }
        out
    }

    /// The number of edges incident to a vertex.
    pub fn vertex_degree(&self, v: VertexId<I>) -> usize {
        self.outgoing_halfedges(v).len()
    }

    /// The mirror image of a half-edge (identity mesh: `None`).
    #[inline]
    pub fn mirror_of(&self, h: HalfEdgeId<I>) -> Option<HalfEdgeId<I>> {
        self.mirror_halfedge.as_ref().map(|m| m[h.index()])
    }

    /// The mirror image of a vertex (boundary vertices are fixed points).
    #[inline]
    pub fn vertex_mirror_of(&self, v: VertexId<I>) -> Option<VertexId<I>> {
        self.mirror_vertex.as_ref().map(|m| m[v.index()])
    }

    /// The mirror image of an edge, if this is a doubled mesh.
    pub fn edge_mirror_of(&self, e: EdgeId<I>) -> Option<EdgeId<I>> {
        self.mirror_of(self.edge_halfedge(e)).map(|h| self.edge_of(h))
    }

    /// Flip an edge, rewiring the two adjacent triangles around the opposite
    /// diagonal.
    ///
    /// Returns the surrounding [`FlipQuad`] (captured before rewiring) so the
    /// caller can update the metric coordinate of the flipped edge. The edge
    /// keeps its id; only its endpoints change.
    ///
    /// Mirror involutions are *not* updated here; doubled meshes must flip
    /// mirror pairs together via the metric layer.
    pub fn flip_edge(&mut self, e: EdgeId<I>) -> FlipQuad<I> {
        let h = self.edge_halfedge(e);
        let t = self.twin(h);
        let hn = self.next(h);
        let hp = self.prev(h);
        let tn = self.next(t);
        let tp = self.prev(t);

        let v0 = self.origin(h);
        let v1 = self.origin(t);
        let v2 = self.origin(hp);
        let v3 = self.origin(tp);

        let f0 = self.face_of(h);
        let f1 = self.face_of(t);

        let quad = FlipQuad {
            edge: e,
            quad: [self.edge_of(hn), self.edge_of(hp), self.edge_of(tn), self.edge_of(tp)],
            vertices: [v0, v1, v2, v3],
        };

        // New face f0 = (v0, v3, v2) with half-edges (tn, h, hp);
        // new face f1 = (v3, v1, v2) with half-edges (tp, hn, t).
        self.halfedge_mut(h).origin = v3;
        self.halfedge_mut(t).origin = v2;

        self.halfedge_mut(tn).next = h;
        self.halfedge_mut(h).next = hp;
        self.halfedge_mut(hp).next = tn;
        self.halfedge_mut(h).prev = tn;
        self.halfedge_mut(hp).prev = h;
        self.halfedge_mut(tn).prev = hp;
        self.halfedge_mut(tn).face = f0;
        self.halfedge_mut(h).face = f0;
        self.halfedge_mut(hp).face = f0;

        self.halfedge_mut(tp).next = hn;
        self.halfedge_mut(hn).next = t;
        self.halfedge_mut(t).next = tp;
        self.halfedge_mut(hn).prev = tp;
        self.halfedge_mut(t).prev = hn;
        self.halfedge_mut(tp).prev = t;
        self.halfedge_mut(tp).face = f1;
        self.halfedge_mut(hn).face = f1;
        self.halfedge_mut(t).face = f1;

        self.faces[f0.index()].halfedge = h;
        self.faces[f1.index()].halfedge = t;

        // The old endpoints may have pointed at the flipped half-edges.
        if self.vertices[v0.index()].halfedge == h {
            self.vertices[v0.index()].halfedge = tn;
        }
        if self.vertices[v1.index()].halfedge == t {
            self.vertices[v1.index()].halfedge = hn;
        }

        quad
    }

    /// Check structural invariants: twin involution, 3-cycles of `next`,
    /// origin/edge consistency.
    pub fn is_valid(&self) -> bool {
        for h in self.halfedge_ids() {
            let he = self.halfedge(h);
            if !he.origin.is_valid() || !he.twin.is_valid() || !he.next.is_valid() {
                return false;
            }
            if self.twin(self.twin(h)) != h || self.twin(h) == h {
                return false;
            }
            if self.next(self.prev(h)) != h || self.prev(self.next(h)) != h {
                return false;
            }
            if self.next(self.next(self.next(h))) != h {
                return false;
            }
            if self.origin(self.next(h)) != self.dest(h) {
                return false;
            }
            if self.edge_of(self.twin(h)) != self.edge_of(h) {
                return false;
            }
        }
        for e in self.edge_ids() {
            if self.edge_of(self.edge_halfedge(e)) != e {
                return false;
            }
        }
        for f in self.face_ids() {
            let [h0, h1, h2] = self.face_halfedges(f);
            if self.face_of(h0) != f || self.face_of(h1) != f || self.face_of(h2) != f {
                return false;
            }
        }
        true
    }
}

impl<I: MeshIndex> Default for Connectivity<I> {
    fn default() -> Self {
        Self::new()
    }
}
