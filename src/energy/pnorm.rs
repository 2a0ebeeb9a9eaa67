//! Lp aggregate of per-triangle distortion.

use nalgebra::DVector;

use super::dirichlet::QuadraticSymDirichletEnergy;
use super::{check_dimension, EnergyFunctor};
use crate::error::{MetricError, Result};
use crate::mesh::MeshIndex;
use crate::metric::ConeMetric;

/// The p-norm energy `(1/p) Σ_f d_f^p` over per-face distortions
/// `d_f = √(δᵀ H⁰_f δ)`, where `H⁰_f` is the reference Hessian of the
/// symmetric Dirichlet energy of face `f`.
///
/// For p = 2 this is exactly the quadratic symmetric Dirichlet energy; larger
/// exponents concentrate the penalty on the worst-distorted triangles.
pub struct PNormEnergy {
    quadratic: QuadraticSymDirichletEnergy,
    p: f64,
}

impl PNormEnergy {
    /// Capture `metric` as the reference. Requires `p ≥ 2` so the energy
    /// stays differentiable at zero distortion.
    pub fn new<I: MeshIndex>(metric: &ConeMetric<I>, p: f64) -> Result<Self> {
        if !(p >= 2.0) || !p.is_finite() {
            return Err(MetricError::invalid_param("p", p, "norm exponent must be at least 2"));
        }
        Ok(Self {
            quadratic: QuadraticSymDirichletEnergy::new(metric)?,
            p,
        })
    }

    fn num_faces(&self) -> usize {
        self.quadratic.faces.len()
    }
}

impl<I: MeshIndex> EnergyFunctor<I> for PNormEnergy {
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64> {
        check_dimension(metric, self.quadratic.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.quadratic.reference;
        let mut total = 0.0;
        for f in 0..self.num_faces() {
            let q = self.quadratic.face_quadratic(f, &delta).max(0.0);
            total += q.sqrt().powf(self.p);
        }
        Ok(total / self.p)
    }

    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>> {
        check_dimension(metric, self.quadratic.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.quadratic.reference;
        let mut grad = DVector::zeros(delta.len());
        for f in 0..self.num_faces() {
            let q = self.quadratic.face_quadratic(f, &delta).max(0.0);
            if q == 0.0 {
                continue;
            }
            // ∇(d^p/p) = d^(p−2) · H⁰ δ.
            let weight = q.sqrt().powf(self.p - 2.0);
            let fr = &self.quadratic.faces[f];
            let h = &self.quadratic.face_hessians[f];
            let d = [delta[fr.sides[0]], delta[fr.sides[1]], delta[fr.sides[2]]];
            for i in 0..3 {
                grad[fr.sides[i]] += weight * (h[i][0] * d[0] + h[i][1] * d[1] + h[i][2] * d[2]);
            }
        }
        Ok(grad)
    }

    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_dimension(metric, self.quadratic.reference.len())?;
        let delta = metric.reduced_metric_coordinates() - &self.quadratic.reference;
        let mut out = DVector::zeros(delta.len());
        for f in 0..self.num_faces() {
            let q = self.quadratic.face_quadratic(f, &delta).max(0.0);
            if q == 0.0 {
                continue;
            }
            let fr = &self.quadratic.faces[f];
            let h = &self.quadratic.face_hessians[f];
            let d = [delta[fr.sides[0]], delta[fr.sides[1]], delta[fr.sides[2]]];
            let vf = [v[fr.sides[0]], v[fr.sides[1]], v[fr.sides[2]]];

            // hd = H⁰ δ restricted to the face.
            let mut hd = [0.0; 3];
            let mut hv = [0.0; 3];
            for i in 0..3 {
                hd[i] = h[i][0] * d[0] + h[i][1] * d[1] + h[i][2] * d[2];
                hv[i] = h[i][0] * vf[0] + h[i][1] * vf[1] + h[i][2] * vf[2];
            }
            let hd_dot_v = hd[0] * vf[0] + hd[1] * vf[1] + hd[2] * vf[2];

            // ∇²(d^p/p) = d^(p−2) H⁰ + (p−2) d^(p−4) (H⁰δ)(H⁰δ)ᵀ.
            let w1 = q.sqrt().powf(self.p - 2.0);
            let w2 = (self.p - 2.0) * q.sqrt().powf(self.p - 4.0);
            for i in 0..3 {
                out[fr.sides[i]] += w1 * hv[i] + w2 * hd[i] * hd_dot_v;
            }
        }
        Ok(out)
    }
}
