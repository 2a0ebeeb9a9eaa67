//! Coordinate-change energies: log length and best-fit log scale.

use nalgebra::DVector;

use super::{check_dimension, EnergyFunctor};
use crate::error::{MetricError, Result};
use crate::mesh::{EdgeId, MeshIndex};
use crate::metric::ConeMetric;
use crate::sparse::{conjugate_gradient_csr, CsrMatrix};

/// Squared change of the reduced coordinates: `½ ‖λ − λ⁰‖²`.
///
/// The simplest distortion measure and the default for optimization. Its
/// gradient is the coordinate change itself and its Hessian is the identity.
pub struct LogLengthEnergy {
    reference: DVector<f64>,
}

impl LogLengthEnergy {
    /// Capture `metric` as the reference.
    pub fn new<I: MeshIndex>(metric: &ConeMetric<I>) -> Self {
        Self {
            reference: metric.reduced_metric_coordinates().clone(),
        }
    }
}

impl<I: MeshIndex> EnergyFunctor<I> for LogLengthEnergy {
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64> {
        check_dimension(metric, self.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.reference;
        Ok(0.5 * delta.norm_squared())
    }

    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>> {
        check_dimension(metric, self.reference.len())?;
        Ok(metric.reduced_metric_coordinates() - &self.reference)
    }

    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_dimension(metric, self.reference.len())?;
        Ok(v.clone())
    }
}

/// Best-fit log-scale energy: `½ ‖u‖²` for the per-vertex factors `u`
/// minimizing `‖A u − (λ − λ⁰)‖²`, where `A` sums the two endpoint factors of
/// each edge.
///
/// A purely conformal coordinate change (λ − λ⁰ = A u) is charged exactly
/// `½‖u‖²`; shear-like changes that no scaling explains are free. The normal
/// equations `AᵀA u = Aᵀδ` are solved by conjugate gradients at every
/// evaluation, and the chain rule turns the gradient and Hessian product into
/// one and two additional solves with the same matrix.
pub struct LogScaleEnergy {
    reference: DVector<f64>,
    /// Endpoint incidence: rows are reduced edges, columns vertices.
    incidence: CsrMatrix,
    /// Normal matrix `AᵀA` (vertex × vertex).
    normal: CsrMatrix,
    cg_max_iterations: usize,
    cg_tolerance: f64,
}

impl LogScaleEnergy {
    /// Capture `metric` as the reference and assemble the incidence and
    /// normal matrices of its connectivity.
    pub fn new<I: MeshIndex>(metric: &ConeMetric<I>) -> Self {
        let mesh = metric.mesh();
        let n = metric.num_reduced_coordinates();
        let num_vertices = mesh.num_vertices();

        let mut incidence_triplets = Vec::with_capacity(2 * n);
        let mut normal_triplets = Vec::with_capacity(4 * n);
        for r in 0..n {
            let e = EdgeId::<I>::new(metric.reduction().representative(r));
            let (a, b) = mesh.edge_endpoints(e);
            let (i, j) = (a.index(), b.index());
            incidence_triplets.push((r, i, 1.0));
            incidence_triplets.push((r, j, 1.0));
            normal_triplets.push((i, i, 1.0));
            normal_triplets.push((j, j, 1.0));
            normal_triplets.push((i, j, 1.0));
            normal_triplets.push((j, i, 1.0));
        }

        Self {
            reference: metric.reduced_metric_coordinates().clone(),
            incidence: CsrMatrix::from_triplets(n, num_vertices, incidence_triplets),
            normal: CsrMatrix::from_triplets(num_vertices, num_vertices, normal_triplets),
            cg_max_iterations: 100.max(4 * num_vertices),
            cg_tolerance: 1e-12,
        }
    }

    /// Solve the normal equations `AᵀA x = b`.
    fn solve_normal(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        conjugate_gradient_csr(&self.normal, b, None, self.cg_max_iterations, self.cg_tolerance)
            .map_err(|_| MetricError::SingularSystem {
                details: "log-scale normal equations did not converge".to_string(),
            })
    }

    /// The best-fit scale factors for a coordinate change.
    fn fit_scale_factors(&self, delta: &DVector<f64>) -> Result<DVector<f64>> {
        self.solve_normal(&self.incidence.mul_transpose_vec(delta))
    }
}

impl<I: MeshIndex> EnergyFunctor<I> for LogScaleEnergy {
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64> {
        check_dimension(metric, self.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.reference;
        let u = self.fit_scale_factors(&delta)?;
        Ok(0.5 * u.norm_squared())
    }

    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>> {
        check_dimension(metric, self.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.reference;
        let u = self.fit_scale_factors(&delta)?;
        // ∇E = A (AᵀA)⁻¹ u.
        let w = self.solve_normal(&u)?;
        Ok(self.incidence.mul_vec(&w))
    }

    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_dimension(metric, self.reference.len())?;
        // H v = A (AᵀA)⁻¹ (AᵀA)⁻¹ Aᵀ v.
        let x = self.solve_normal(&self.incidence.mul_transpose_vec(v))?;
        let y = self.solve_normal(&x)?;
        Ok(self.incidence.mul_vec(&y))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{finite_difference_gradient, perturbed, tetrahedron_metric};
    use super::*;

    #[test]
    fn test_log_length_zero_at_reference() {
        let metric = tetrahedron_metric();
        let energy = LogLengthEnergy::new(&metric);
        let e: f64 = EnergyFunctor::<u32>::energy(&energy, &metric).unwrap();
        assert_eq!(e, 0.0);
    }

    #[test]
    fn test_log_length_value_and_gradient() {
        let metric = tetrahedron_metric();
        let energy = LogLengthEnergy::new(&metric);

        let mut coords = metric.reduced_metric_coordinates().clone();
        coords[2] += 0.4;
        let moved = metric.with_coordinates(coords).unwrap();

        let e: f64 = EnergyFunctor::<u32>::energy(&energy, &moved).unwrap();
        assert!((e - 0.5 * 0.4 * 0.4).abs() < 1e-14);

        let grad = EnergyFunctor::<u32>::gradient(&energy, &moved).unwrap();
        assert!((grad[2] - 0.4).abs() < 1e-14);
        assert!(grad.iter().enumerate().all(|(i, &g)| i == 2 || g.abs() < 1e-14));
    }

    #[test]
    fn test_log_length_rejects_dimension_mismatch() {
        let metric = tetrahedron_metric();
        let energy = LogLengthEnergy {
            reference: DVector::zeros(3),
        };
        let result = EnergyFunctor::<u32>::energy(&energy, &metric);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_scale_zero_at_reference() {
        let metric = tetrahedron_metric();
        let energy = LogScaleEnergy::new(&metric);
        let e: f64 = EnergyFunctor::<u32>::energy(&energy, &metric).unwrap();
        assert!(e.abs() < 1e-12);
    }

    #[test]
    fn test_log_scale_charges_conformal_change_exactly() {
        let metric = tetrahedron_metric();
        let energy = LogScaleEnergy::new(&metric);

        // A purely conformal update: λ += u_i + u_j.
        let u = DVector::from_vec(vec![0.1, -0.2, 0.3, 0.05]);
        let scaled = metric.scaled(&u);
        let e: f64 = EnergyFunctor::<u32>::energy(&energy, &scaled).unwrap();
        assert!(
            (e - 0.5 * u.norm_squared()).abs() < 1e-10,
            "expected {} got {}",
            0.5 * u.norm_squared(),
            e
        );
    }

    #[test]
    fn test_log_scale_gradient_matches_finite_differences() {
        let metric = tetrahedron_metric();
        let energy = LogScaleEnergy::new(&metric);
        let moved = perturbed(&metric, 0.2);

        let grad = EnergyFunctor::<u32>::gradient(&energy, &moved).unwrap();
        let fd = finite_difference_gradient(&energy, &moved, 1e-6);
        assert!((&grad - &fd).amax() < 1e-6);
    }

    #[test]
    fn test_log_scale_hessian_is_linear_map() {
        let metric = tetrahedron_metric();
        let energy = LogScaleEnergy::new(&metric);

        let n = metric.num_reduced_coordinates();
        let v1 = DVector::from_fn(n, |i, _| (i as f64 + 1.0).recip());
        let v2 = DVector::from_fn(n, |i, _| (i as f64 * 0.3).cos());

        let h1 = EnergyFunctor::<u32>::hessian_vector_product(&energy, &metric, &v1).unwrap();
        let h2 = EnergyFunctor::<u32>::hessian_vector_product(&energy, &metric, &v2).unwrap();
        let sum = &v1 + &v2;
        let h12 = EnergyFunctor::<u32>::hessian_vector_product(&energy, &metric, &sum).unwrap();
        assert!((&h12 - &(h1 + h2)).amax() < 1e-9);
    }
}
