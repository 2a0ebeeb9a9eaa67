//! Shear/scale decomposition of the coordinate space.
//!
//! Conformal scalings `λ_e += u_i + u_j` span one subspace of the reduced
//! coordinate space; the *shear* directions — gradients of the per-edge log
//! cross-ratios — span its orthogonal complement, because the cross-ratio of
//! the quad around an edge is invariant under any scaling. Augmenting the
//! shear basis with one global scale direction yields a domain in which every
//! choice of coordinates is feasible after a single projection (the
//! projection solves for the remaining, dependent scale factors). The
//! codomain keeps one scale direction per constrained vertex orbit minus a
//! single global gauge.
//!
//! This underlies diagnostic sampling of the energy landscape: the energy can
//! be evaluated at arbitrary domain coordinates without running descent.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, info};

use super::projection::{project_to_constraint, ProjectionParameters};
use crate::energy::EnergyFunctor;
use crate::error::{MetricError, Result};
use crate::mesh::{EdgeId, MeshIndex, VertexId};
use crate::metric::ConeMetric;

/// Relative threshold below which a shear row is considered dependent on the
/// basis collected so far.
const INDEPENDENCE_THRESHOLD: f64 = 1e-8;

/// The shear subspace of a metric: an orthonormal basis and the edges whose
/// shear rows generated it.
#[derive(Debug, Clone)]
pub struct ShearBasis {
    /// Orthonormal basis vectors over the reduced coordinates.
    pub basis: Vec<DVector<f64>>,
    /// The representative edge behind each basis vector.
    pub independent_edges: Vec<usize>,
}

/// The reparameterization of the coordinate space used by explicit
/// optimization.
#[derive(Debug, Clone)]
pub struct OptimizationDomain {
    /// Free directions: shear basis, free-cone scalings, and one global scale.
    pub domain: DMatrix<f64>,
    /// Dependent directions: constrained-vertex scalings minus one gauge.
    pub codomain: DMatrix<f64>,
    /// Coordinates of the initial metric in the domain basis.
    pub domain_coords: DVector<f64>,
    /// Coordinates of the initial metric in the codomain basis.
    pub codomain_coords: DVector<f64>,
}

/// The shear row of one edge: ±1 on the quad edges around it, accumulated
/// into reduced coordinates.
fn shear_row<I: MeshIndex>(metric: &ConeMetric<I>, e: EdgeId<I>) -> DVector<f64> {
    let mesh = metric.mesh();
    let h = mesh.edge_halfedge(e);
    let t = mesh.twin(h);
    let mut row = DVector::zeros(metric.num_reduced_coordinates());
    let mut add = |h: crate::mesh::HalfEdgeId<I>, sign: f64| {
        row[metric.reduction().reduced(mesh.edge_of(h).index())] += sign;
    };
    // Log cross-ratio of the quad: opposite pairs enter with opposite signs.
    add(mesh.next(h), 1.0);
    add(mesh.prev(h), -1.0);
    add(mesh.next(t), 1.0);
    add(mesh.prev(t), -1.0);
    row
}

/// Compute an orthonormal basis of the shear subspace by a greedy
/// Gram-Schmidt sweep over the reduced edges.
///
/// Shear rows are orthogonal to every conformal scaling by construction, so
/// the collected basis spans a complement of the scaling subspace. The sweep
/// is deterministic: edges are visited in index order.
pub fn compute_shear_basis<I: MeshIndex>(metric: &ConeMetric<I>) -> ShearBasis {
    let mut basis: Vec<DVector<f64>> = Vec::new();
    let mut independent_edges = Vec::new();

    for r in 0..metric.num_reduced_coordinates() {
        let e = EdgeId::new(metric.reduction().representative(r));
        let mut row = shear_row(metric, e);
        let scale = row.norm();
        if scale < INDEPENDENCE_THRESHOLD {
            continue;
        }
        for b in &basis {
            let coeff = row.dot(b);
            row -= b * coeff;
        }
        let remaining = row.norm();
        if remaining > INDEPENDENCE_THRESHOLD * scale {
            basis.push(row / remaining);
            independent_edges.push(e.index());
        }
    }

    debug!(dimension = basis.len(), "computed shear dual basis");
    ShearBasis {
        basis,
        independent_edges,
    }
}

/// The reduced-coordinate direction of scaling a set of vertices by one:
/// each edge gains the number of its endpoints in the set.
fn scaling_direction<I: MeshIndex>(metric: &ConeMetric<I>, vertices: &[usize]) -> DVector<f64> {
    let mesh = metric.mesh();
    let mut dir = DVector::zeros(metric.num_reduced_coordinates());
    for r in 0..metric.num_reduced_coordinates() {
        let e = EdgeId::<I>::new(metric.reduction().representative(r));
        let (a, b) = mesh.edge_endpoints(e);
        let mut val = 0.0;
        if vertices.contains(&a.index()) {
            val += 1.0;
        }
        if vertices.contains(&b.index()) {
            val += 1.0;
        }
        dir[r] = val;
    }
    dir
}

/// Vertex orbits under the mirror involution (singletons on plain meshes),
/// each listed once by its lowest member.
fn vertex_orbits<I: MeshIndex>(metric: &ConeMetric<I>) -> Vec<Vec<usize>> {
    let mesh = metric.mesh();
    let mut orbits = Vec::new();
    for v in 0..mesh.num_vertices() {
        match mesh.vertex_mirror_of(VertexId::<I>::new(v)) {
            Some(m) if m.index() < v => continue,
            Some(m) if m.index() != v => orbits.push(vec![v, m.index()]),
            _ => orbits.push(vec![v]),
        }
    }
    orbits
}

/// Assemble the optimization domain of a metric from its shear basis.
///
/// The domain stacks the shear basis, one scaling direction per *free* vertex
/// orbit, and the global scale direction; the codomain holds the scaling
/// directions of the constrained orbits, minus the last one (the global gauge
/// freedom). Together the columns span the full coordinate space; the initial
/// metric's coordinates in both bases are obtained by a dense solve.
pub fn compute_optimization_domain<I: MeshIndex>(
    metric: &ConeMetric<I>,
    shear: &ShearBasis,
) -> Result<OptimizationDomain> {
    let n = metric.num_reduced_coordinates();
    let orbits = vertex_orbits(metric);

    let mut domain_cols: Vec<DVector<f64>> = shear.basis.clone();
    for orbit in &orbits {
        if metric.is_free_vertex(VertexId::new(orbit[0])) {
            domain_cols.push(scaling_direction(metric, orbit));
        }
    }
    let all_vertices: Vec<usize> = (0..metric.mesh().num_vertices()).collect();
    domain_cols.push(scaling_direction(metric, &all_vertices));

    let constrained_orbits: Vec<&Vec<usize>> = orbits
        .iter()
        .filter(|orbit| !metric.is_free_vertex(VertexId::new(orbit[0])))
        .collect();
    let mut codomain_cols: Vec<DVector<f64>> = Vec::new();
    for orbit in constrained_orbits.iter().take(constrained_orbits.len().saturating_sub(1)) {
        codomain_cols.push(scaling_direction(metric, orbit));
    }

    if domain_cols.len() + codomain_cols.len() != n {
        return Err(MetricError::SingularSystem {
            details: format!(
                "domain ({}) and codomain ({}) do not span the {} coordinates",
                domain_cols.len(),
                codomain_cols.len(),
                n
            ),
        });
    }

    let domain = DMatrix::from_columns(&domain_cols);
    let codomain = if codomain_cols.is_empty() {
        DMatrix::zeros(n, 0)
    } else {
        DMatrix::from_columns(&codomain_cols)
    };

    // Express the current coordinates in the combined basis.
    let mut combined = DMatrix::zeros(n, n);
    combined.columns_mut(0, domain.ncols()).copy_from(&domain);
    combined
        .columns_mut(domain.ncols(), codomain.ncols())
        .copy_from(&codomain);
    let solution = combined
        .lu()
        .solve(metric.reduced_metric_coordinates())
        .ok_or_else(|| MetricError::SingularSystem {
            details: "shear/scale basis is not invertible".to_string(),
        })?;

    let domain_coords = solution.rows(0, domain.ncols()).into_owned();
    let codomain_coords = solution.rows(domain.ncols(), codomain.ncols()).into_owned();

    info!(
        domain = domain.ncols(),
        codomain = codomain.ncols(),
        "computed optimization domain"
    );
    Ok(OptimizationDomain {
        domain,
        codomain,
        domain_coords,
        codomain_coords,
    })
}

impl OptimizationDomain {
    /// Reconstruct full metric coordinates from domain and codomain
    /// coordinates.
    pub fn reconstruct(
        &self,
        domain_coords: &DVector<f64>,
        codomain_coords: &DVector<f64>,
    ) -> DVector<f64> {
        &self.domain * domain_coords + &self.codomain * codomain_coords
    }
}

/// Evaluate an energy at arbitrary domain coordinates.
///
/// The full coordinates are reconstructed from the domain contribution plus
/// the current codomain coordinates, then projected onto the constraint
/// manifold (which adjusts only the dependent scale directions), and the
/// energy is evaluated at the feasible result.
pub fn domain_coordinate_energy<I: MeshIndex>(
    metric: &ConeMetric<I>,
    energy: &dyn EnergyFunctor<I>,
    domain: &OptimizationDomain,
    domain_coords: &DVector<f64>,
    codomain_coords: &DVector<f64>,
    proj_params: &ProjectionParameters,
) -> Result<f64> {
    let coords = domain.reconstruct(domain_coords, codomain_coords);
    let trial = metric.with_coordinates(coords)?;
    let feasible = project_to_constraint(&trial, proj_params)?;
    energy.energy(&feasible)
}

/// Configuration of the energy-grid sweep.
#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Number of samples along each axis.
    pub num_steps: usize,
    /// Half-width of the sampled square around the initial point.
    pub range: f64,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            num_steps: 800,
            range: 1.0,
        }
    }
}

/// Sample the energy over a 2-D grid in the first two domain coordinates.
///
/// Entry `(i, j)` holds the energy at offsets `(−range + i·δ, −range + j·δ)`
/// from the initial domain point. Samples are independent projections and are
/// evaluated in parallel by rows; a sample whose projection fails is recorded
/// as NaN rather than aborting the sweep.
pub fn sample_energy_grid<I: MeshIndex>(
    metric: &ConeMetric<I>,
    energy: &dyn EnergyFunctor<I>,
    domain: &OptimizationDomain,
    options: &GridOptions,
    proj_params: &ProjectionParameters,
) -> Result<DMatrix<f64>> {
    if domain.domain.ncols() < 2 {
        return Err(MetricError::invalid_param(
            "domain",
            domain.domain.ncols(),
            "energy grid sampling needs at least two domain coordinates",
        ));
    }
    if options.num_steps < 2 {
        return Err(MetricError::invalid_param(
            "num_steps",
            options.num_steps,
            "grid needs at least two samples per axis",
        ));
    }

    let n = options.num_steps;
    let delta = 2.0 * options.range / (n as f64 - 1.0);
    let x0 = domain.domain_coords[0];
    let y0 = domain.domain_coords[1];

    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut row = Vec::with_capacity(n);
            for j in 0..n {
                let mut coords = domain.domain_coords.clone();
                coords[0] = x0 - options.range + delta * i as f64;
                coords[1] = y0 - options.range + delta * j as f64;
                let value = domain_coordinate_energy(
                    metric,
                    energy,
                    domain,
                    &coords,
                    &domain.codomain_coords,
                    proj_params,
                )
                .unwrap_or(f64::NAN);
                row.push(value);
            }
            row
        })
        .collect();

    let mut grid = DMatrix::zeros(n, n);
    for (i, row) in rows.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            grid[(i, j)] = value;
        }
    }
    Ok(grid)
}
