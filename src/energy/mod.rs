//! Distortion energies over cone metrics.
//!
//! An energy is a pure function of a [`ConeMetric`] relative to a fixed
//! *reference* metric captured when the functor is constructed. The
//! [`EnergyFunctor`] capability trait exposes the value, the gradient with
//! respect to the reduced coordinates, and a Hessian-vector product for
//! Newton-type descent directions.
//!
//! # Variants
//!
//! - [`LogLengthEnergy`]: ½‖λ − λ⁰‖², the squared coordinate change.
//! - [`LogScaleEnergy`]: ½‖u‖² for the per-vertex log scale factors that best
//!   explain the coordinate change in least squares.
//! - [`SymDirichletEnergy`]: area-weighted symmetric Dirichlet distortion of
//!   the per-triangle maps from the reference metric to the current one.
//! - [`QuadraticSymDirichletEnergy`]: its exact second-order expansion at the
//!   reference, a fixed sparse quadratic form.
//! - [`PNormEnergy`]: an Lp aggregate of the per-triangle quadratic
//!   distortion; p = 2 coincides with the quadratic symmetric Dirichlet
//!   energy.
//!
//! Functors are bound to the connectivity of their reference metric;
//! evaluating one on a metric with a different reduced dimension is reported
//! as an invalid-parameter error.

mod dirichlet;
mod length;
mod pnorm;

use nalgebra::DVector;

use crate::error::Result;
use crate::mesh::MeshIndex;
use crate::metric::ConeMetric;

pub use dirichlet::{QuadraticSymDirichletEnergy, SymDirichletEnergy};
pub use length::{LogLengthEnergy, LogScaleEnergy};
pub use pnorm::PNormEnergy;

/// A distortion energy with first and second derivatives.
///
/// Implementations capture their reference metric at construction; all three
/// methods evaluate relative to it.
pub trait EnergyFunctor<I: MeshIndex = u32>: Send + Sync {
    /// The scalar distortion of `metric` relative to the reference.
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64>;

    /// Gradient with respect to the reduced metric coordinates.
    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>>;

    /// Product of the energy Hessian at `metric` with a vector.
    ///
    /// Used by the projected Newton direction through a matrix-free conjugate
    /// gradient solve.
    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>>;
}

/// Selector for the energy families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyChoice {
    /// Squared change of log edge lengths.
    LogLength,
    /// Squared best-fit per-vertex log scale factors.
    LogScale,
    /// Second-order symmetric Dirichlet energy at the reference metric.
    QuadraticSymDirichlet,
    /// Full symmetric Dirichlet energy.
    SymDirichlet,
    /// Lp norm of per-triangle distortion with exponent `p`.
    PNorm {
        /// The norm exponent (p ≥ 2).
        p: f64,
    },
}

/// Construct the selected energy with `metric` as its reference.
pub fn generate_energy<I: MeshIndex>(
    metric: &ConeMetric<I>,
    choice: EnergyChoice,
) -> Result<Box<dyn EnergyFunctor<I>>> {
    Ok(match choice {
        EnergyChoice::LogLength => Box::new(LogLengthEnergy::new(metric)),
        EnergyChoice::LogScale => Box::new(LogScaleEnergy::new(metric)),
        EnergyChoice::QuadraticSymDirichlet => Box::new(QuadraticSymDirichletEnergy::new(metric)?),
        EnergyChoice::SymDirichlet => Box::new(SymDirichletEnergy::new(metric)?),
        EnergyChoice::PNorm { p } => Box::new(PNormEnergy::new(metric, p)?),
    })
}

/// Shared dimension check for functors bound to a reference connectivity.
pub(crate) fn check_dimension<I: MeshIndex>(
    metric: &ConeMetric<I>,
    expected: usize,
) -> Result<()> {
    if metric.num_reduced_coordinates() != expected {
        return Err(crate::error::MetricError::invalid_param(
            "metric",
            metric.num_reduced_coordinates(),
            "metric does not match the energy's reference connectivity",
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::mesh::build_from_triangles;
    use crate::metric::MetricMode;
    use std::f64::consts::PI;

    /// A regular tetrahedron metric with Gauss-Bonnet-consistent π targets.
    pub fn tetrahedron_metric() -> ConeMetric {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh = build_from_triangles(&faces, 4).unwrap();
        let lengths = vec![1.0; mesh.num_edges()];
        ConeMetric::from_lengths(mesh, &lengths, vec![PI; 4], &[], MetricMode::Penner).unwrap()
    }

    /// A deterministic small perturbation of the reference coordinates.
    pub fn perturbed(metric: &ConeMetric, scale: f64) -> ConeMetric {
        let n = metric.num_reduced_coordinates();
        let coords = DVector::from_fn(n, |i, _| {
            metric.reduced_metric_coordinates()[i] + scale * ((i as f64 * 0.7).sin())
        });
        metric.with_coordinates(coords).unwrap()
    }

    /// Central finite-difference gradient of an energy.
    pub fn finite_difference_gradient(
        energy: &dyn EnergyFunctor,
        metric: &ConeMetric,
        h: f64,
    ) -> DVector<f64> {
        let n = metric.num_reduced_coordinates();
        DVector::from_fn(n, |i, _| {
            let mut plus = metric.reduced_metric_coordinates().clone();
            let mut minus = plus.clone();
            plus[i] += h;
            minus[i] -= h;
            let ep = energy.energy(&metric.with_coordinates(plus).unwrap()).unwrap();
            let em = energy.energy(&metric.with_coordinates(minus).unwrap()).unwrap();
            (ep - em) / (2.0 * h)
        })
    }
}
