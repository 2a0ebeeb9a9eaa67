//! Projection onto the angle-sum constraint manifold.
//!
//! Given arbitrary metric coordinates, the projection finds per-vertex log
//! scale factors `u` such that the conformally scaled metric
//! `λ_e += u_i + u_j` satisfies the angle-sum constraints. This is a Newton
//! iteration on the residual: the Jacobian of the angle sums with respect to
//! `u` is (minus) the half-cotangent Laplacian of the working triangulation,
//! a symmetric positive semidefinite system solved by conjugate gradients.
//! Because the update moves only along conformal directions, the result lives
//! on the *input* connectivity even when the working view flips edges, and
//! Ptolemy flips never change the metric being scaled.

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::error::{MetricError, Result};
use crate::mesh::{EdgeId, MeshIndex, VertexId};
use crate::metric::{ConeMetric, MetricView};
use crate::sparse::{conjugate_gradient, CsrMatrix};

/// Configuration of the projection operator.
///
/// Shared read-only across one optimization run.
#[derive(Debug, Clone)]
pub struct ProjectionParameters {
    /// Flip the working triangulation to Delaunay during projection
    /// (Penner mode). Without flips the triangulation is fixed and degenerate
    /// steps are rejected instead.
    pub use_edge_flips: bool,
    /// Flip the *base* connectivity to Delaunay before optimization starts.
    pub initial_ptolemy: bool,
    /// Maximum Newton iterations before reporting non-convergence.
    pub max_iterations: usize,
    /// Feasibility tolerance on the max-norm of the angle residual.
    pub tolerance: f64,
    /// Maximum step halvings per Newton iteration.
    pub max_line_steps: usize,
    /// Diagonal damping added when the scale-factor system fails to solve.
    pub regularization: f64,
    /// Conjugate gradient iteration cap.
    pub cg_max_iterations: usize,
    /// Conjugate gradient relative residual tolerance.
    pub cg_tolerance: f64,
}

impl Default for ProjectionParameters {
    fn default() -> Self {
        Self {
            use_edge_flips: true,
            initial_ptolemy: true,
            max_iterations: 50,
            tolerance: 1e-10,
            max_line_steps: 20,
            regularization: 1e-8,
            cg_max_iterations: 2000,
            cg_tolerance: 1e-12,
        }
    }
}

impl ProjectionParameters {
    /// Parameters for discrete-length (fixed connectivity) runs: no flips, no
    /// initial Ptolemy transform, and the iteration budget used by the
    /// reference discrete pipeline.
    pub fn discrete_metric() -> Self {
        Self {
            use_edge_flips: false,
            initial_ptolemy: false,
            max_iterations: 30,
            ..Self::default()
        }
    }

    /// Set the feasibility tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the maximum Newton iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Enable or disable edge flips during projection.
    pub fn with_edge_flips(mut self, use_edge_flips: bool) -> Self {
        self.use_edge_flips = use_edge_flips;
        self
    }
}

/// Project a metric onto the constraint manifold.
///
/// Returns a metric on the same connectivity whose angle-sum residual is
/// within `params.tolerance`, or an error when the Newton iteration does not
/// converge within the budget. Projecting an already feasible metric returns
/// its coordinates unchanged.
///
/// The iteration is deterministic for a fixed input and configuration.
pub fn project_to_constraint<I: MeshIndex>(
    metric: &ConeMetric<I>,
    params: &ProjectionParameters,
) -> Result<ConeMetric<I>> {
    let constrained = metric.constrained_vertices();
    if constrained.is_empty() {
        return Ok(metric.clone());
    }

    let num_vertices = metric.mesh().num_vertices();
    let mut row_of_vertex = vec![usize::MAX; num_vertices];
    for (row, &v) in constrained.iter().enumerate() {
        row_of_vertex[v] = row;
    }

    let mut view = metric.view(params.use_edge_flips)?;
    let mut u = DVector::zeros(num_vertices);

    let mut residual = constraint_residual(&view, metric, &constrained)?;
    let mut residual_norm = residual.amax();

    for iteration in 0..params.max_iterations {
        if residual_norm <= params.tolerance {
            debug!(iteration, residual_norm, "projection converged");
            return Ok(metric.scaled(&u));
        }

        // Newton system: L δu = F with L the half-cotangent Laplacian of the
        // working triangulation, restricted to constrained vertices.
        let laplacian = scale_factor_laplacian(&view, &row_of_vertex, constrained.len())?;
        let delta_compact = solve_scale_system(&laplacian, &residual, params, iteration)?;

        let mut delta = DVector::zeros(num_vertices);
        for (row, &v) in constrained.iter().enumerate() {
            delta[v] = delta_compact[row];
        }
        symmetrize(metric, &mut delta);

        // Damped step: shrink until the residual decreases.
        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..params.max_line_steps {
            let mut trial = view.clone();
            let scaled_delta: Vec<f64> = delta.iter().map(|d| d * step).collect();
            trial.scale(&scaled_delta);
            match trial.restore_delaunay().and_then(|_| {
                constraint_residual(&trial, metric, &constrained)
            }) {
                Ok(trial_residual) => {
                    let trial_norm = trial_residual.amax();
                    if trial_norm < residual_norm || trial_norm <= params.tolerance {
                        accepted = Some((trial, trial_residual, trial_norm, step));
                        break;
                    }
                }
                Err(MetricError::NumericalDegeneracy { face }) => {
                    debug!(face, step, "degenerate trial step during projection");
                }
                Err(err) => return Err(err),
            }
            step *= 0.5;
        }

        match accepted {
            Some((trial, trial_residual, trial_norm, step)) => {
                debug!(iteration, residual_norm = trial_norm, step, "projection step");
                view = trial;
                residual = trial_residual;
                residual_norm = trial_norm;
                u += &delta * step;
            }
            None => {
                warn!(iteration, residual_norm, "projection line search stalled");
                return Err(MetricError::ConvergenceFailed { iterations: iteration });
            }
        }
    }

    if residual_norm <= params.tolerance {
        return Ok(metric.scaled(&u));
    }
    Err(MetricError::ConvergenceFailed {
        iterations: params.max_iterations,
    })
}

/// Residual of the constrained angle sums on a working view.
fn constraint_residual<I: MeshIndex>(
    view: &MetricView<I>,
    metric: &ConeMetric<I>,
    constrained: &[usize],
) -> Result<DVector<f64>> {
    let sums = view.vertex_angle_sums()?;
    Ok(DVector::from_iterator(
        constrained.len(),
        constrained.iter().map(|&v| sums[v] - metric.target_angles()[v]),
    ))
}

/// The half-cotangent Laplacian over constrained vertices: `L[i][j] = -w_ij`
/// for constrained neighbors, `L[i][i] = Σ_e w_e` over all incident edges,
/// with `w_e` half the sum of the cotangents opposite `e`.
fn scale_factor_laplacian<I: MeshIndex>(
    view: &MetricView<I>,
    row_of_vertex: &[usize],
    num_constrained: usize,
) -> Result<CsrMatrix> {
    let mesh = view.mesh();
    let (_, cots) = view.corner_data()?;

    let mut edge_weight = vec![0.0; mesh.num_edges()];
    for f in mesh.face_ids() {
        let hs = mesh.face_halfedges(f);
        for k in 0..3 {
            edge_weight[mesh.edge_of(hs[k]).index()] += cots[f.index()][k] / 2.0;
        }
    }

    let mut triplets = Vec::with_capacity(4 * mesh.num_edges());
    for e_idx in 0..mesh.num_edges() {
        let (a, b) = mesh.edge_endpoints(EdgeId::<I>::new(e_idx));
        let (ra, rb) = (row_of_vertex[a.index()], row_of_vertex[b.index()]);
        let w = edge_weight[e_idx];
        if ra != usize::MAX {
            triplets.push((ra, ra, w));
        }
        if rb != usize::MAX {
            triplets.push((rb, rb, w));
        }
        if ra != usize::MAX && rb != usize::MAX {
            triplets.push((ra, rb, -w));
            triplets.push((rb, ra, -w));
        }
    }
    Ok(CsrMatrix::from_triplets(num_constrained, num_constrained, triplets))
}

/// Solve the scale-factor system, once plain and once with diagonal damping
/// if the first attempt fails.
fn solve_scale_system(
    laplacian: &CsrMatrix,
    residual: &DVector<f64>,
    params: &ProjectionParameters,
    iteration: usize,
) -> Result<DVector<f64>> {
    let plain = conjugate_gradient(
        |v| laplacian.mul_vec(v),
        residual,
        None,
        params.cg_max_iterations,
        params.cg_tolerance,
    );
    match plain {
        Ok(delta) => Ok(delta),
        Err(_) => {
            debug!(iteration, "scale-factor solve failed, retrying with damping");
            let mu = params.regularization;
            conjugate_gradient(
                |v| laplacian.mul_vec(v) + v * mu,
                residual,
                None,
                params.cg_max_iterations,
                params.cg_tolerance,
            )
            .map_err(|_| MetricError::SingularSystem {
                details: format!("scale-factor system singular at iteration {}", iteration),
            })
        }
    }
}

/// Average scale factors over vertex mirror orbits so that doubled meshes
/// stay reflection symmetric and orbit coordinates remain well defined.
fn symmetrize<I: MeshIndex>(metric: &ConeMetric<I>, u: &mut DVector<f64>) {
    if !metric.mesh().is_doubled() {
        return;
    }
    for v in 0..u.len() {
        let m = metric
            .mesh()
            .vertex_mirror_of(VertexId::<I>::new(v))
            .expect("doubled mesh has vertex mirrors")
            .index();
        if m > v {
            let avg = (u[v] + u[m]) / 2.0;
            u[v] = avg;
            u[m] = avg;
        }
    }
}
