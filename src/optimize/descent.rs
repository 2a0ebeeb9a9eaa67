//! The implicit (projected descent) metric optimizer.
//!
//! The outer loop alternates between proposing a descent direction in the
//! tangent space of the constraint manifold, projecting trial points back
//! onto the manifold, and accepting them under an Armijo sufficient-decrease
//! test. Projection failures and degenerate trial metrics are treated as
//! rejected steps: the step length shrinks and the iteration continues, so a
//! run always ends with the best feasible metric found.

use std::io::Write;
use std::path::PathBuf;

use nalgebra::DVector;
use tracing::{debug, info, warn};

use super::constraint::vertex_constraint;
use super::projection::{project_to_constraint, ProjectionParameters};
use crate::energy::EnergyFunctor;
use crate::error::{MetricError, Result};
use crate::mesh::MeshIndex;
use crate::metric::ConeMetric;
use crate::sparse::{conjugate_gradient, CsrMatrix};

/// Descent direction selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionChoice {
    /// Negative energy gradient projected to the constraint tangent space.
    ProjectedGradient,
    /// Newton direction from a matrix-free solve with the energy Hessian,
    /// regularized and projected to the tangent space.
    ProjectedNewton,
}

/// Configuration of the descent driver.
///
/// Shared read-only across one optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationParameters {
    /// Which descent direction to use.
    pub direction: DirectionChoice,
    /// Maximum outer iterations.
    pub num_iterations: usize,
    /// Convergence threshold on the max-norm of the projected gradient.
    pub convergence_tolerance: f64,
    /// Armijo sufficient-decrease coefficient.
    pub armijo_coefficient: f64,
    /// Maximum step halvings per outer iteration.
    pub max_backtracking_steps: usize,
    /// Initial trial step length.
    pub initial_step: f64,
    /// Diagonal regularization added to the Newton system.
    pub newton_regularization: f64,
    /// Conjugate gradient iteration cap for tangent projections and Newton
    /// solves.
    pub cg_max_iterations: usize,
    /// Conjugate gradient relative residual tolerance.
    pub cg_tolerance: f64,
    /// Directory for per-iteration diagnostics (written once at the end of
    /// the run as `iteration_data.csv`).
    pub output_dir: Option<PathBuf>,
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        Self {
            direction: DirectionChoice::ProjectedGradient,
            num_iterations: 200,
            convergence_tolerance: 1e-8,
            armijo_coefficient: 1e-4,
            max_backtracking_steps: 25,
            initial_step: 1.0,
            newton_regularization: 1e-8,
            cg_max_iterations: 1000,
            cg_tolerance: 1e-10,
            output_dir: None,
        }
    }
}

impl OptimizationParameters {
    /// Set the descent direction.
    pub fn with_direction(mut self, direction: DirectionChoice) -> Self {
        self.direction = direction;
        self
    }

    /// Set the maximum number of outer iterations.
    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Set the convergence tolerance on the projected gradient.
    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    /// Set the diagnostics output directory.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }
}

/// How a descent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescentStatus {
    /// The projected gradient norm fell below the tolerance.
    Converged,
    /// The iteration budget was exhausted.
    IterationLimit,
    /// No acceptable step was found within the backtracking budget.
    NoDescentStep,
}

/// One row of the per-iteration diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct IterationRecord {
    /// Outer iteration index.
    pub iteration: usize,
    /// Energy after the accepted step.
    pub energy: f64,
    /// Max-norm of the projected gradient before the step.
    pub gradient_norm: f64,
    /// Accepted step length (0 when no step was taken).
    pub step_size: f64,
}

/// Result of a descent run: the best feasible metric together with status
/// and diagnostics.
#[derive(Debug)]
pub struct OptimizationResult<I: MeshIndex = u32> {
    /// The best feasible metric found.
    pub metric: ConeMetric<I>,
    /// Terminal state of the driver.
    pub status: DescentStatus,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Per-iteration records, in order.
    pub history: Vec<IterationRecord>,
}

/// Minimize an energy over the constraint manifold.
///
/// The initial metric is projected to feasibility first; every trial point of
/// the line search is projected before its energy is evaluated, so the energy
/// decreases monotonically across accepted steps and the returned metric is
/// always feasible. Failures inside an iteration (projection non-convergence,
/// degenerate trial metrics) shrink the step; only exhausting the
/// backtracking budget ends the run early, with the best metric so far.
pub fn optimize_metric<I: MeshIndex>(
    metric: &ConeMetric<I>,
    energy: &dyn EnergyFunctor<I>,
    proj_params: &ProjectionParameters,
    opt_params: &OptimizationParameters,
) -> Result<OptimizationResult<I>> {
    let mut current = project_to_constraint(metric, proj_params)?;
    let mut current_energy = energy.energy(&current)?;
    info!(energy = current_energy, "starting metric optimization");

    let mut history = Vec::new();
    let mut status = DescentStatus::IterationLimit;
    let mut iterations = 0;

    for iteration in 0..opt_params.num_iterations {
        iterations = iteration + 1;

        let gradient = energy.gradient(&current)?;
        let constraint = vertex_constraint(&current, true)?;
        let jacobian = constraint.jacobian.as_ref().expect("jacobian requested");

        let projected_gradient = project_to_tangent(jacobian, &gradient, opt_params)?;
        let gradient_norm = projected_gradient.amax();
        if gradient_norm <= opt_params.convergence_tolerance {
            info!(iteration, gradient_norm, "descent converged");
            status = DescentStatus::Converged;
            break;
        }

        let direction = match opt_params.direction {
            DirectionChoice::ProjectedGradient => -&projected_gradient,
            DirectionChoice::ProjectedNewton => {
                newton_direction(energy, &current, &gradient, jacobian, opt_params)
                    .unwrap_or_else(|| -&projected_gradient)
            }
        };

        // The direction must be a descent direction for the Armijo test.
        let slope = gradient.dot(&direction);
        let (direction, slope) = if slope < 0.0 {
            (direction, slope)
        } else {
            let d = -&projected_gradient;
            let s = gradient.dot(&d);
            (d, s)
        };

        // Backtracking line search over projected trial points.
        let mut step = opt_params.initial_step;
        let mut accepted = None;
        for _ in 0..opt_params.max_backtracking_steps {
            let trial_coords = current.reduced_metric_coordinates() + &direction * step;
            let trial = current.with_coordinates(trial_coords)?;
            match project_to_constraint(&trial, proj_params)
                .and_then(|projected| Ok((energy.energy(&projected)?, projected)))
            {
                Ok((trial_energy, projected)) => {
                    let decrease_bound =
                        current_energy + opt_params.armijo_coefficient * step * slope;
                    if trial_energy <= decrease_bound {
                        accepted = Some((projected, trial_energy, step));
                        break;
                    }
                    debug!(step, trial_energy, "insufficient decrease, shrinking step");
                }
                Err(MetricError::ConvergenceFailed { .. })
                | Err(MetricError::NumericalDegeneracy { .. }) => {
                    debug!(step, "trial projection failed, shrinking step");
                }
                Err(err) => return Err(err),
            }
            step *= 0.5;
        }

        match accepted {
            Some((projected, trial_energy, step)) => {
                debug!(iteration, energy = trial_energy, step, gradient_norm, "accepted step");
                history.push(IterationRecord {
                    iteration,
                    energy: trial_energy,
                    gradient_norm,
                    step_size: step,
                });
                current = projected;
                current_energy = trial_energy;
            }
            None => {
                warn!(iteration, gradient_norm, "no acceptable step found");
                history.push(IterationRecord {
                    iteration,
                    energy: current_energy,
                    gradient_norm,
                    step_size: 0.0,
                });
                status = DescentStatus::NoDescentStep;
                break;
            }
        }
    }

    info!(
        iterations,
        energy = current_energy,
        ?status,
        "metric optimization finished"
    );
    if let Some(dir) = &opt_params.output_dir {
        write_iteration_history(dir, &history)?;
    }

    Ok(OptimizationResult {
        metric: current,
        status,
        iterations,
        history,
    })
}

/// Project a vector onto the null space of the constraint Jacobian:
/// `g_t = g − Jᵀ (J Jᵀ)⁻¹ J g`.
fn project_to_tangent(
    jacobian: &CsrMatrix,
    vector: &DVector<f64>,
    params: &OptimizationParameters,
) -> Result<DVector<f64>> {
    let jg = jacobian.mul_vec(vector);
    let w = conjugate_gradient(
        |v| jacobian.mul_vec(&jacobian.mul_transpose_vec(v)),
        &jg,
        None,
        params.cg_max_iterations,
        params.cg_tolerance,
    )
    .map_err(|_| MetricError::SingularSystem {
        details: "tangent projection system did not converge".to_string(),
    })?;
    Ok(vector - jacobian.mul_transpose_vec(&w))
}

/// Regularized Newton direction, projected to the tangent space. Returns
/// `None` when the matrix-free solve fails, in which case the caller falls
/// back to the projected gradient.
fn newton_direction<I: MeshIndex>(
    energy: &dyn EnergyFunctor<I>,
    metric: &ConeMetric<I>,
    gradient: &DVector<f64>,
    jacobian: &CsrMatrix,
    params: &OptimizationParameters,
) -> Option<DVector<f64>> {
    let mu = params.newton_regularization;
    let rhs = -gradient;
    let solve = conjugate_gradient(
        |v| match energy.hessian_vector_product(metric, v) {
            Ok(hv) => hv + v * mu,
            // A degenerate Hessian evaluation poisons the solve; fall back.
            Err(_) => v * f64::NAN,
        },
        &rhs,
        None,
        params.cg_max_iterations,
        params.cg_tolerance,
    );
    let newton = match solve {
        Ok(d) if d.iter().all(|x| x.is_finite()) => d,
        _ => {
            debug!("Newton solve failed, falling back to projected gradient");
            return None;
        }
    };
    project_to_tangent(jacobian, &newton, params).ok()
}

/// Persist the per-iteration diagnostics as a CSV table.
fn write_iteration_history(dir: &PathBuf, history: &[IterationRecord]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("iteration_data.csv");
    let mut file = std::fs::File::create(&path)?;
    writeln!(file, "iteration,energy,gradient_norm,step_size")?;
    for record in history {
        writeln!(
            file,
            "{},{:.17e},{:.17e},{:.17e}",
            record.iteration, record.energy, record.gradient_norm, record.step_size
        )?;
    }
    debug!(path = %path.display(), "wrote iteration history");
    Ok(())
}
