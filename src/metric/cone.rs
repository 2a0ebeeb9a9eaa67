//! The differentiable cone metric.
//!
//! A [`ConeMetric`] binds half-edge connectivity, reduced per-edge metric
//! coordinates (λ = 2·log ℓ), per-vertex target angles, and the set of free
//! cones. It is the single owner of combinatorial state: optimization steps
//! produce new instances via [`ConeMetric::with_coordinates`] rather than
//! mutating shared data, so energies and constraints always evaluate against
//! a fixed snapshot.
//!
//! Angle queries go through a [`MetricView`], a scratch copy of the
//! connectivity that is flipped to an intrinsic Delaunay triangulation first
//! (Penner mode). Ptolemy flips preserve the underlying metric, so the view
//! changes nothing about the coordinates it was built from; it only makes the
//! triangle inequalities hold so angles are well defined. A [`FlipChain`]
//! records the derivative of each flip, letting constraint Jacobians computed
//! on the flipped triangulation be pulled back to the original reduced
//! coordinates.

use std::collections::{BTreeMap, VecDeque};

use nalgebra::{DVector, Point3};
use tracing::debug;

use super::angles::{
    euclidean_flip, is_delaunay_quad, ptolemy_flip, triangle_angles, triangle_cotangents,
};
use super::reduction::ReductionMap;
use crate::cones;
use crate::error::{MetricError, Result};
use crate::mesh::{closed_double, edge_lengths_from_positions, Connectivity, EdgeId, HalfEdgeId, MeshIndex, VertexId};

/// How metric coordinates are interpreted during angle computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMode {
    /// Penner coordinates: arbitrary values are admissible; angle queries flip
    /// the working triangulation to Delaunay with Ptolemy flips first.
    Penner,
    /// Discrete edge lengths: connectivity is fixed, coordinates must satisfy
    /// the triangle inequality in every face, and flips use the Euclidean
    /// diagonal (rejected when the quad is not convex).
    DiscreteLength,
}

/// Tolerance used in the intrinsic Delaunay test.
const DELAUNAY_TOLERANCE: f64 = 1e-12;

/// A discrete conformal metric with prescribed cone angles.
#[derive(Debug, Clone)]
pub struct ConeMetric<I: MeshIndex = u32> {
    mesh: Connectivity<I>,
    reduction: ReductionMap,
    coords: DVector<f64>,
    target_angles: Vec<f64>,
    free_vertex: Vec<bool>,
    mode: MetricMode,
}

impl<I: MeshIndex> ConeMetric<I> {
    /// Create a metric from connectivity, per-edge lengths, and per-vertex
    /// target angles.
    ///
    /// `free_cones` lists internal vertex indices whose angle is not enforced.
    /// With no free cones the target angles are validated against the
    /// discrete Gauss-Bonnet relation before the metric is built.
    pub fn from_lengths(
        mesh: Connectivity<I>,
        lengths: &[f64],
        target_angles: Vec<f64>,
        free_cones: &[usize],
        mode: MetricMode,
    ) -> Result<Self> {
        if lengths.len() != mesh.num_edges() {
            return Err(MetricError::invalid_param(
                "lengths",
                lengths.len(),
                "one length per mesh edge required",
            ));
        }
        // Gauss-Bonnet only binds when every target is enforced; free cones
        // absorb whatever defect the constrained targets leave over.
        if free_cones.is_empty() {
            cones::validate_target_angles(&mesh, &target_angles)?;
        } else {
            cones::validate_angle_count(&mesh, &target_angles)?;
        }

        let mut free_vertex = vec![false; mesh.num_vertices()];
        for &v in free_cones {
            if v >= free_vertex.len() {
                return Err(MetricError::invalid_param("free_cones", v, "vertex index out of range"));
            }
            free_vertex[v] = true;
        }
        // Free cones must be symmetric on a doubled mesh: both copies float.
        if mesh.is_doubled() {
            for v in 0..free_vertex.len() {
                if free_vertex[v] {
                    let m = mesh.vertex_mirror_of(VertexId::new(v)).unwrap();
                    free_vertex[m.index()] = true;
                }
            }
        }

        let reduction = ReductionMap::for_mesh(&mesh);
        let log_lengths: Vec<f64> = lengths.iter().map(|&l| 2.0 * l.ln()).collect();
        let coords = reduction.reduce(&log_lengths);
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(MetricError::invalid_param(
                "lengths",
                "non-positive",
                "edge lengths must be positive and finite",
            ));
        }

        Ok(Self {
            mesh,
            reduction,
            coords,
            target_angles,
            free_vertex,
            mode,
        })
    }

    /// The connectivity this metric lives on.
    #[inline]
    pub fn mesh(&self) -> &Connectivity<I> {
        &self.mesh
    }

    /// The coordinate interpretation mode.
    #[inline]
    pub fn mode(&self) -> MetricMode {
        self.mode
    }

    /// The reduction from mesh edges to independent coordinates.
    #[inline]
    pub fn reduction(&self) -> &ReductionMap {
        &self.reduction
    }

    /// Number of independent metric coordinates.
    #[inline]
    pub fn num_reduced_coordinates(&self) -> usize {
        self.reduction.len()
    }

    /// The reduced metric coordinate vector (λ = 2·log ℓ per independent edge).
    #[inline]
    pub fn reduced_metric_coordinates(&self) -> &DVector<f64> {
        &self.coords
    }

    /// The target angle at each internal vertex.
    #[inline]
    pub fn target_angles(&self) -> &[f64] {
        &self.target_angles
    }

    /// Whether a vertex's angle constraint is relaxed.
    #[inline]
    pub fn is_free_vertex(&self, v: VertexId<I>) -> bool {
        self.free_vertex[v.index()]
    }

    /// Internal indices of the constrained vertices, in order.
    pub fn constrained_vertices(&self) -> Vec<usize> {
        (0..self.mesh.num_vertices()).filter(|&v| !self.free_vertex[v]).collect()
    }

    /// The coordinate of the edge under a half-edge.
    #[inline]
    pub fn halfedge_coordinate(&self, h: HalfEdgeId<I>) -> f64 {
        self.coords[self.reduction.reduced(self.mesh.edge_of(h).index())]
    }

    /// Functional update: the same metric with new coordinates.
    pub fn with_coordinates(&self, coords: DVector<f64>) -> Result<Self> {
        if coords.len() != self.num_reduced_coordinates() {
            return Err(MetricError::invalid_param(
                "coords",
                coords.len(),
                "reduced coordinate dimension mismatch",
            ));
        }
        let mut metric = self.clone();
        metric.coords = coords;
        Ok(metric)
    }

    /// The metric conformally scaled by per-vertex log factors: every edge
    /// coordinate gains the sum of its endpoint factors.
    ///
    /// On doubled meshes `u` must be mirror symmetric so that edge orbits stay
    /// consistent; the projection operator enforces this.
    pub fn scaled(&self, u: &DVector<f64>) -> Self {
        let mut metric = self.clone();
        for r in 0..self.reduction.len() {
            let e = EdgeId::new(self.reduction.representative(r));
            let (a, b) = self.mesh.edge_endpoints(e);
            metric.coords[r] += u[a.index()] + u[b.index()];
        }
        metric
    }

    /// Per-vertex interior angle sums of the current metric.
    pub fn vertex_angle_sums(&self) -> Result<Vec<f64>> {
        self.view(self.mode == MetricMode::Penner)?.vertex_angle_sums()
    }

    /// Angle-sum residual (angle sum − target) at each constrained vertex.
    pub fn constraint_residual(&self) -> Result<DVector<f64>> {
        let sums = self.vertex_angle_sums()?;
        Ok(DVector::from_iterator(
            self.constrained_vertices().len(),
            self.constrained_vertices()
                .into_iter()
                .map(|v| sums[v] - self.target_angles[v]),
        ))
    }

    /// Build a working view of the metric for angle computation.
    ///
    /// With `allow_flips` (Penner mode only) the view is flipped to an
    /// intrinsic Delaunay triangulation first. Without flips the coordinates
    /// must already satisfy the triangle inequality in every face.
    pub fn view(&self, allow_flips: bool) -> Result<MetricView<I>> {
        MetricView::new(self, allow_flips && self.mode == MetricMode::Penner)
    }

    /// Perform a single edge flip, returning a new metric instance.
    ///
    /// The flipped coordinate is updated consistently with the mode: a Ptolemy
    /// flip in Penner mode (always possible) or a Euclidean flip in
    /// discrete-length mode (rejected when the quad is not convex). On a
    /// doubled mesh the mirror edge is flipped together with `e` to preserve
    /// the reflection symmetry.
    pub fn flipped(&self, e: EdgeId<I>) -> Result<Self> {
        let mut metric = self.clone();
        metric.flip_reduced_in_place(self.reduction.reduced(e.index()))?;
        Ok(metric)
    }

    /// Flip non-Delaunay edges of the base connectivity until every edge
    /// satisfies the Delaunay condition (the "initial Ptolemy transform").
    ///
    /// Only meaningful in Penner mode; the flipped connectivity becomes the
    /// reference for subsequent energies and constraints.
    pub fn make_base_delaunay(&mut self) -> Result<usize> {
        if self.mode != MetricMode::Penner {
            return Err(MetricError::FlipRejected {
                edge: 0,
                reason: "base Delaunay transform requires Penner mode",
            });
        }

        let num_reduced = self.reduction.len();
        let mut queue: VecDeque<usize> = (0..num_reduced).collect();
        let mut in_queue = vec![true; num_reduced];
        let max_flips = 50 * self.mesh.num_edges() + 100;
        let mut flips = 0;

        while let Some(r) = queue.pop_front() {
            in_queue[r] = false;
            let e = EdgeId::new(self.reduction.representative(r));
            let (quad, diag) = self.reduced_quad_coordinates(e);
            if is_delaunay_quad(quad, diag, DELAUNAY_TOLERANCE) {
                continue;
            }
            self.flip_reduced_in_place(r)?;
            flips += 1;
            if flips > max_flips {
                return Err(MetricError::FlipLimit { flips });
            }
            // Re-examine the quad edges around the flip.
            let quad_edges = self.quad_edges(EdgeId::new(self.reduction.representative(r)));
            for qe in quad_edges {
                let qr = self.reduction.reduced(qe.index());
                if !in_queue[qr] {
                    in_queue[qr] = true;
                    queue.push_back(qr);
                }
            }
        }

        if flips > 0 {
            debug!(flips, "made base connectivity Delaunay");
        }
        Ok(flips)
    }

    /// Coordinates of the quad around an edge: outer edges and diagonal.
    fn reduced_quad_coordinates(&self, e: EdgeId<I>) -> ([f64; 4], f64) {
        let quad = self.quad_edges(e);
        let lam = |edge: EdgeId<I>| self.coords[self.reduction.reduced(edge.index())];
        (
            [lam(quad[0]), lam(quad[1]), lam(quad[2]), lam(quad[3])],
            lam(e),
        )
    }

    /// The four outer edges of the quad around `e`, in Ptolemy pairing order.
    fn quad_edges(&self, e: EdgeId<I>) -> [EdgeId<I>; 4] {
        let h = self.mesh.edge_halfedge(e);
        let t = self.mesh.twin(h);
        [
            self.mesh.edge_of(self.mesh.next(h)),
            self.mesh.edge_of(self.mesh.prev(h)),
            self.mesh.edge_of(self.mesh.next(t)),
            self.mesh.edge_of(self.mesh.prev(t)),
        ]
    }

    /// Flip the orbit of reduced coordinate `r` in place, updating mirror
    /// pointers on doubled meshes.
    fn flip_reduced_in_place(&mut self, r: usize) -> Result<()> {
        let e = EdgeId::new(self.reduction.representative(r));
        let (quad, diag) = self.reduced_quad_coordinates(e);

        let new_lambda = match self.mode {
            MetricMode::Penner => ptolemy_flip(quad, diag).0,
            MetricMode::DiscreteLength => {
                euclidean_flip(quad, diag).ok_or(MetricError::FlipRejected {
                    edge: e.index(),
                    reason: "Euclidean flip would create a degenerate triangle",
                })?
            }
        };

        let partner = self.mesh.edge_mirror_of(e).filter(|&m| m != e);
        self.mesh.flip_edge(e);
        if let Some(em) = partner {
            self.mesh.flip_edge(em);
        }
        self.coords[r] = new_lambda;

        // Restore the half-edge mirror involution around the flipped pair.
        if self.mesh.is_doubled() {
            let mut relink = |edge: EdgeId<I>, other: EdgeId<I>| {
                let h = self.mesh.edge_halfedge(edge);
                let t = self.mesh.twin(h);
                let ho = self.mesh.edge_halfedge(other);
                let to = self.mesh.twin(ho);
                for hh in [h, t] {
                    let want_origin = self.mesh.vertex_mirror_of(self.mesh.dest(hh)).unwrap();
                    let m = if self.mesh.origin(ho) == want_origin { ho } else { to };
                    let mirror = self.mesh.mirror_halfedge.as_mut().unwrap();
                    mirror[hh.index()] = m;
                    mirror[m.index()] = hh;
                }
            };
            match partner {
                Some(em) => {
                    relink(e, em);
                }
                None => relink(e, e),
            }
        }
        Ok(())
    }
}

/// Construct the initial cone metric for a mesh with prescribed cone angles.
///
/// Meshes with boundary are closed by the double construction; the returned
/// `vtx_reindex` maps internal vertices back to the input vertex order.
/// Target angles and free-cone indices are given in the input order; on the
/// double, boundary vertices receive twice their target (the cone is split
/// across the two copies) and interior targets apply to both copies.
///
/// With `initial_ptolemy` (Penner mode only) the base connectivity is flipped
/// to an intrinsic Delaunay triangulation before optimization begins.
pub fn initial_cone_metric<I: MeshIndex>(
    positions: &[Point3<f64>],
    faces: &[[usize; 3]],
    target_angles: &[f64],
    free_cones: &[usize],
    mode: MetricMode,
    initial_ptolemy: bool,
) -> Result<(ConeMetric<I>, Vec<usize>)> {
    if target_angles.len() != positions.len() {
        return Err(MetricError::InvalidTargetAngles {
            details: format!(
                "expected {} target angles, got {}",
                positions.len(),
                target_angles.len()
            ),
        });
    }

    let closed = closed_double::<I>(faces, positions.len())?;
    let lengths = edge_lengths_from_positions(&closed.mesh, positions, &closed.vtx_reindex)?;

    let internal_targets: Vec<f64> = closed
        .vtx_reindex
        .iter()
        .zip(&closed.on_boundary)
        .map(|(&orig, &on_boundary)| {
            if on_boundary {
                2.0 * target_angles[orig]
            } else {
                target_angles[orig]
            }
        })
        .collect();

    let internal_free: Vec<usize> = (0..closed.vtx_reindex.len())
        .filter(|&v| free_cones.contains(&closed.vtx_reindex[v]))
        .collect();

    let mut metric = ConeMetric::from_lengths(
        closed.mesh,
        &lengths,
        internal_targets,
        &internal_free,
        mode,
    )?;
    if initial_ptolemy && mode == MetricMode::Penner {
        metric.make_base_delaunay()?;
    }
    Ok((metric, closed.vtx_reindex))
}

/// Derivative of the flip sequence applied to a view: for each working edge,
/// a sparse linear expansion of its coordinate over the reduced coordinates
/// of the base metric.
#[derive(Debug, Clone)]
pub(crate) struct FlipChain {
    rows: Vec<Vec<(usize, f64)>>,
}

impl FlipChain {
    fn identity(num_edges: usize, reduction: &ReductionMap) -> Self {
        Self {
            rows: (0..num_edges).map(|e| vec![(reduction.reduced(e), 1.0)]).collect(),
        }
    }

    /// Record a Ptolemy flip of `edge` with quad `quad` and pair weight `w`:
    /// the new diagonal coordinate is `w(λa + λc) + (1-w)(λb + λd) − λe` to
    /// first order.
    fn apply_flip(&mut self, edge: usize, quad: [usize; 4], w: f64) {
        let mut combo: BTreeMap<usize, f64> = BTreeMap::new();
        let mut add = |row: &[(usize, f64)], factor: f64, combo: &mut BTreeMap<usize, f64>| {
            for &(col, val) in row {
                *combo.entry(col).or_insert(0.0) += factor * val;
            }
        };
        add(&self.rows[quad[0]], w, &mut combo);
        add(&self.rows[quad[2]], w, &mut combo);
        add(&self.rows[quad[1]], 1.0 - w, &mut combo);
        add(&self.rows[quad[3]], 1.0 - w, &mut combo);
        add(&self.rows[edge], -1.0, &mut combo);
        self.rows[edge] = combo.into_iter().filter(|(_, v)| v.abs() > 1e-300).collect();
    }

    /// The expansion of a working-edge coordinate over reduced coordinates.
    #[inline]
    pub(crate) fn row(&self, edge: usize) -> &[(usize, f64)] {
        &self.rows[edge]
    }
}

/// A working triangulation for angle computation.
///
/// Owns a scratch copy of the connectivity and one coordinate per edge.
/// Penner-mode views are flipped to Delaunay on construction; scaling and
/// further Delaunay passes support the projection operator's inner loop.
#[derive(Debug, Clone)]
pub struct MetricView<I: MeshIndex = u32> {
    pub(crate) mesh: Connectivity<I>,
    pub(crate) lambda: Vec<f64>,
    pub(crate) chain: FlipChain,
    flips_enabled: bool,
    scaled: bool,
    num_flips: usize,
}

impl<I: MeshIndex> MetricView<I> {
    fn new(metric: &ConeMetric<I>, flips_enabled: bool) -> Result<Self> {
        let mut mesh = metric.mesh.clone();
        // The view is scratch state; mirror bookkeeping is not maintained
        // through its flips.
        mesh.mirror_halfedge = None;
        mesh.mirror_vertex = None;

        let lambda = metric.reduction.expand(&metric.coords);
        let chain = FlipChain::identity(mesh.num_edges(), &metric.reduction);
        let mut view = Self {
            mesh,
            lambda,
            chain,
            flips_enabled,
            scaled: false,
            num_flips: 0,
        };
        if flips_enabled {
            view.make_delaunay()?;
        } else {
            view.check_triangle_inequalities()?;
        }
        Ok(view)
    }

    /// Number of flips performed by this view so far.
    #[inline]
    pub fn num_flips(&self) -> usize {
        self.num_flips
    }

    /// The working connectivity.
    #[inline]
    pub fn mesh(&self) -> &Connectivity<I> {
        &self.mesh
    }

    /// Whether the view's chain still describes the flip derivative (it is
    /// invalidated by [`MetricView::scale`]).
    #[inline]
    pub(crate) fn chain_valid(&self) -> bool {
        !self.scaled
    }

    /// Coordinates of the three sides of a face, in half-edge order.
    #[inline]
    pub(crate) fn face_lambda(&self, f: crate::mesh::FaceId<I>) -> [f64; 3] {
        let [h0, h1, h2] = self.mesh.face_halfedges(f);
        [
            self.lambda[self.mesh.edge_of(h0).index()],
            self.lambda[self.mesh.edge_of(h1).index()],
            self.lambda[self.mesh.edge_of(h2).index()],
        ]
    }

    fn check_triangle_inequalities(&self) -> Result<()> {
        for f in self.mesh.face_ids() {
            if triangle_angles(self.face_lambda(f)).is_none() {
                return Err(MetricError::NumericalDegeneracy { face: f.index() });
            }
        }
        Ok(())
    }

    /// Flip until every edge is intrinsically Delaunay.
    pub(crate) fn make_delaunay(&mut self) -> Result<usize> {
        let num_edges = self.mesh.num_edges();
        let mut queue: VecDeque<usize> = (0..num_edges).collect();
        let mut in_queue = vec![true; num_edges];
        let max_flips = 50 * num_edges + 100;
        let mut flips = 0;

        while let Some(e_idx) = queue.pop_front() {
            in_queue[e_idx] = false;
            let e = EdgeId::new(e_idx);
            let (quad_lambda, diag) = self.quad_coordinates(e);
            if is_delaunay_quad(quad_lambda, diag, DELAUNAY_TOLERANCE) {
                continue;
            }

            let (new_lambda, w) = ptolemy_flip(quad_lambda, diag);
            let quad = self.mesh.flip_edge(e);
            self.lambda[e_idx] = new_lambda;
            self.chain.apply_flip(
                e_idx,
                [
                    quad.quad[0].index(),
                    quad.quad[1].index(),
                    quad.quad[2].index(),
                    quad.quad[3].index(),
                ],
                w,
            );
            flips += 1;
            if flips > max_flips {
                return Err(MetricError::FlipLimit { flips });
            }

            for qe in quad.quad {
                if !in_queue[qe.index()] {
                    in_queue[qe.index()] = true;
                    queue.push_back(qe.index());
                }
            }
        }

        self.num_flips += flips;
        Ok(flips)
    }

    fn quad_coordinates(&self, e: EdgeId<I>) -> ([f64; 4], f64) {
        let h = self.mesh.edge_halfedge(e);
        let t = self.mesh.twin(h);
        let lam = |h: HalfEdgeId<I>| self.lambda[self.mesh.edge_of(h).index()];
        (
            [
                lam(self.mesh.next(h)),
                lam(self.mesh.prev(h)),
                lam(self.mesh.next(t)),
                lam(self.mesh.prev(t)),
            ],
            self.lambda[e.index()],
        )
    }

    /// Conformally scale the view: each edge coordinate gains the sum of its
    /// endpoint factors. Invalidates the flip chain.
    pub(crate) fn scale(&mut self, u: &[f64]) {
        for e_idx in 0..self.mesh.num_edges() {
            let (a, b) = self.mesh.edge_endpoints(EdgeId::new(e_idx));
            self.lambda[e_idx] += u[a.index()] + u[b.index()];
        }
        self.scaled = true;
    }

    /// Re-establish the Delaunay condition after a scale, when flips are
    /// enabled for this view.
    pub(crate) fn restore_delaunay(&mut self) -> Result<usize> {
        if self.flips_enabled {
            self.make_delaunay()
        } else {
            self.check_triangle_inequalities()?;
            Ok(0)
        }
    }

    /// Per-face corner angles and cotangents.
    ///
    /// Returns `(angles, cotangents)`, each one triple per face where entry
    /// `k` belongs to the corner *opposite* the face's `k`-th half-edge.
    pub(crate) fn corner_data(&self) -> Result<(Vec<[f64; 3]>, Vec<[f64; 3]>)> {
        let mut angles = Vec::with_capacity(self.mesh.num_faces());
        let mut cots = Vec::with_capacity(self.mesh.num_faces());
        for f in self.mesh.face_ids() {
            let tri = triangle_angles(self.face_lambda(f))
                .ok_or(MetricError::NumericalDegeneracy { face: f.index() })?;
            angles.push(tri);
            cots.push(triangle_cotangents(tri));
        }
        Ok((angles, cots))
    }

    /// Per-vertex interior angle sums.
    pub fn vertex_angle_sums(&self) -> Result<Vec<f64>> {
        let (angles, _) = self.corner_data()?;
        let mut sums = vec![0.0; self.mesh.num_vertices()];
        for f in self.mesh.face_ids() {
            let hs = self.mesh.face_halfedges(f);
            let tri = angles[f.index()];
            for k in 0..3 {
                // The angle opposite half-edge k sits at the vertex not on it.
                let apex = self.mesh.origin(hs[(k + 2) % 3]);
                sums[apex.index()] += tri[k];
            }
        }
        Ok(sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;
    use std::f64::consts::PI;

    fn regular_tetrahedron() -> (Connectivity, Vec<f64>) {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh = build_from_triangles(&faces, 4).unwrap();
        let lengths = vec![1.0; mesh.num_edges()];
        (mesh, lengths)
    }

    fn tetrahedron_metric(mode: MetricMode) -> ConeMetric {
        let (mesh, lengths) = regular_tetrahedron();
        // Angle sum at each vertex of the regular tetrahedron is π, which is
        // also the Gauss-Bonnet-consistent cone assignment (4 defects of π).
        let targets = vec![PI; 4];
        ConeMetric::from_lengths(mesh, &lengths, targets, &[], mode).unwrap()
    }

    #[test]
    fn test_angle_sums_regular_tetrahedron() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let sums = metric.vertex_angle_sums().unwrap();
        for s in sums {
            assert!((s - PI).abs() < 1e-12);
        }
    }

    #[test]
    fn test_residual_zero_for_exact_targets() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let residual = metric.constraint_residual().unwrap();
        assert!(residual.amax() < 1e-12);
    }

    #[test]
    fn test_gauss_bonnet_violation_rejected() {
        let (mesh, lengths) = regular_tetrahedron();
        // Two π-cones with the others flat: defect sum 2π ≠ 4π.
        let targets = vec![PI, PI, 2.0 * PI, 2.0 * PI];
        let result = ConeMetric::from_lengths(mesh, &lengths, targets, &[], MetricMode::Penner);
        assert!(matches!(result, Err(MetricError::InvalidTargetAngles { .. })));
    }

    #[test]
    fn test_with_coordinates_is_functional() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let mut coords = metric.reduced_metric_coordinates().clone();
        coords[0] += 0.25;
        let updated = metric.with_coordinates(coords).unwrap();
        assert!((metric.reduced_metric_coordinates()[0] - updated.reduced_metric_coordinates()[0]).abs() > 0.2);
    }

    #[test]
    fn test_scaled_adds_endpoint_factors() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let u = DVector::from_vec(vec![0.1, 0.2, 0.3, 0.4]);
        let scaled = metric.scaled(&u);
        for r in 0..metric.num_reduced_coordinates() {
            let e = EdgeId::new(metric.reduction().representative(r));
            let (a, b) = metric.mesh().edge_endpoints(e);
            let expected = metric.reduced_metric_coordinates()[r] + u[a.index()] + u[b.index()];
            assert!((scaled.reduced_metric_coordinates()[r] - expected).abs() < 1e-14);
        }
    }

    #[test]
    fn test_view_flips_non_delaunay_coordinates() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        // Blow up one coordinate far past the Delaunay threshold.
        let mut coords = metric.reduced_metric_coordinates().clone();
        coords[0] += 4.0;
        let stretched = metric.with_coordinates(coords).unwrap();

        let view = stretched.view(true).unwrap();
        assert!(view.num_flips() > 0);
        // Angles are defined and sum to πF over the whole mesh.
        let sums = view.vertex_angle_sums().unwrap();
        let total: f64 = sums.iter().sum();
        assert!((total - PI * view.mesh().num_faces() as f64).abs() < 1e-9);
    }

    #[test]
    fn test_discrete_mode_rejects_degenerate_coordinates() {
        let metric = tetrahedron_metric(MetricMode::DiscreteLength);
        let mut coords = metric.reduced_metric_coordinates().clone();
        coords[0] += 4.0;
        let stretched = metric.with_coordinates(coords).unwrap();
        let result = stretched.vertex_angle_sums();
        assert!(matches!(result, Err(MetricError::NumericalDegeneracy { .. })));
    }

    #[test]
    fn test_ptolemy_flip_preserves_angle_sums() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let before = metric.vertex_angle_sums().unwrap();
        let flipped = metric.flipped(EdgeId::new(0)).unwrap();
        let after = flipped.vertex_angle_sums().unwrap();
        for v in 0..4 {
            assert!(
                (before[v] - after[v]).abs() < 1e-10,
                "angle sum changed at vertex {}: {} vs {}",
                v,
                before[v],
                after[v]
            );
        }
    }

    #[test]
    fn test_discrete_flip_uses_euclidean_diagonal() {
        let metric = tetrahedron_metric(MetricMode::DiscreteLength);
        let flipped = metric.flipped(EdgeId::new(0)).unwrap();
        // Flipping inside two unit equilateral triangles: the opposite
        // diagonal has length √3, so λ = 2·log √3 = log 3.
        let got = flipped.reduced_metric_coordinates()[0];
        assert!((got - 3.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_discrete_flip_rejected_for_reflex_quad() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh = build_from_triangles::<u32>(&faces, 4).unwrap();
        // Deterministic edge order: {0,2},{1,2},{0,1},{1,3},{0,3},{2,3}.
        // Around edge {0,1} the quad is a reflex kite: the two triangle
        // angles at the shared corner sum past π.
        let lengths = vec![1.9, 1.0, 1.0, 1.0, 1.9, 1.0];
        let metric = ConeMetric::from_lengths(
            mesh,
            &lengths,
            vec![PI; 4],
            &[],
            MetricMode::DiscreteLength,
        )
        .unwrap();
        let result = metric.flipped(EdgeId::new(2));
        assert!(matches!(result, Err(MetricError::FlipRejected { .. })));
    }

    #[test]
    fn test_flip_chain_matches_finite_differences() {
        let metric = tetrahedron_metric(MetricMode::Penner);
        let mut coords = metric.reduced_metric_coordinates().clone();
        coords[0] += 4.0; // force at least one flip
        let stretched = metric.with_coordinates(coords.clone()).unwrap();
        let view = stretched.view(true).unwrap();
        assert!(view.num_flips() > 0);
        assert!(view.chain_valid());

        // Pick the flipped edge's chain row and compare against finite
        // differences of the flipped coordinate.
        let h = 1e-6;
        for e_idx in 0..view.mesh().num_edges() {
            let row = view.chain.row(e_idx);
            for r in 0..coords.len() {
                let analytic: f64 =
                    row.iter().find(|&&(c, _)| c == r).map(|&(_, v)| v).unwrap_or(0.0);

                let mut plus = coords.clone();
                plus[r] += h;
                let mut minus = coords.clone();
                minus[r] -= h;
                let vp = metric.with_coordinates(plus).unwrap().view(true).unwrap();
                let vm = metric.with_coordinates(minus).unwrap().view(true).unwrap();
                let fd = (vp.lambda[e_idx] - vm.lambda[e_idx]) / (2.0 * h);
                assert!(
                    (fd - analytic).abs() < 1e-5,
                    "chain derivative mismatch at edge {} wrt coord {}: fd {} vs {}",
                    e_idx,
                    r,
                    fd,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_initial_metric_closed_mesh() {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        // Gauss-Bonnet on the sphere: defects sum to 4π.
        let sums = {
            let (metric, _) = initial_cone_metric::<u32>(
                &positions,
                &faces,
                &[PI; 4],
                &[],
                MetricMode::Penner,
                true,
            )
            .unwrap();
            metric.vertex_angle_sums().unwrap()
        };
        let total: f64 = sums.iter().map(|s| 2.0 * PI - s).sum();
        assert!((total - 4.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_initial_metric_doubles_boundary() {
        // Flat square disk; the double is a sphere. Boundary targets double.
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        // A square's corner angles are π/2; doubling gives π at each corner,
        // which sums to the required 4π of defect.
        let targets = vec![PI / 2.0; 4];
        let (metric, vtx_reindex) = initial_cone_metric::<u32>(
            &positions,
            &faces,
            &targets,
            &[],
            MetricMode::Penner,
            false,
        )
        .unwrap();
        assert_eq!(vtx_reindex, vec![0, 1, 2, 3]);
        assert!(metric.mesh().is_doubled());
        assert_eq!(metric.target_angles(), &[PI, PI, PI, PI]);

        // The flat square's double already satisfies the targets.
        let residual = metric.constraint_residual().unwrap();
        assert!(residual.amax() < 1e-12);
    }
}
