//! Symmetric Dirichlet distortion energies.
//!
//! For a linear map `J` between two triangles the symmetric Dirichlet
//! distortion is `‖J‖²_F + ‖J⁻¹‖²_F`, which reaches its minimum value 4 at an
//! isometry. Both Frobenius norms are expressible intrinsically through the
//! squared edge lengths `a_i = exp(λ_i)`:
//!
//! With the symmetric bilinear form `B(a) = Σ_i (r_j + r_k − r_i) a_i` over
//! reference squared lengths `r` and the Heron quantity
//! `D(a) = 2(a₁a₂ + a₂a₃ + a₃a₁) − a₁² − a₂² − a₃² = 16·area²`,
//!
//! `‖J‖²_F = 2 B(a)/D(r)` and `‖J⁻¹‖²_F = 2 B(a)/D(a)`,
//!
//! so the per-face energy used here is `area⁰ · (B/D⁰ + B/D − 2)`, zero at
//! the reference. Gradient and Hessian follow by differentiating the rational
//! expression through `∂a_i/∂λ_i = a_i`.

use nalgebra::DVector;

use super::{check_dimension, EnergyFunctor};
use crate::error::{MetricError, Result};
use crate::mesh::MeshIndex;
use crate::metric::ConeMetric;

/// Reference data of one face: reduced side indices and the quantities of
/// the reference triangle.
#[derive(Debug, Clone)]
pub(crate) struct FaceRef {
    /// Reduced coordinate index of each side.
    pub sides: [usize; 3],
    /// Reference squared lengths `r_i = exp(λ⁰_i)`.
    pub r: [f64; 3],
    /// Reference area.
    pub area0: f64,
    /// `D(r) = 16·area⁰²`.
    pub d0: f64,
    /// `P_i = r_j + r_k − r_i` (twice `r_i · cot` of the opposite angle × 4A⁰).
    pub p: [f64; 3],
}

/// Build per-face reference data from a metric. Fails when a reference face
/// is degenerate.
pub(crate) fn face_references<I: MeshIndex>(metric: &ConeMetric<I>) -> Result<Vec<FaceRef>> {
    let mesh = metric.mesh();
    let mut refs = Vec::with_capacity(mesh.num_faces());
    for f in mesh.face_ids() {
        let hs = mesh.face_halfedges(f);
        let sides = [
            metric.reduction().reduced(mesh.edge_of(hs[0]).index()),
            metric.reduction().reduced(mesh.edge_of(hs[1]).index()),
            metric.reduction().reduced(mesh.edge_of(hs[2]).index()),
        ];
        let coords = metric.reduced_metric_coordinates();
        let r = [
            coords[sides[0]].exp(),
            coords[sides[1]].exp(),
            coords[sides[2]].exp(),
        ];
        let d0 = heron(r);
        if !(d0 > 0.0) || !d0.is_finite() {
            return Err(MetricError::NumericalDegeneracy { face: f.index() });
        }
        refs.push(FaceRef {
            sides,
            r,
            area0: d0.sqrt() / 4.0,
            d0,
            p: [
                r[1] + r[2] - r[0],
                r[2] + r[0] - r[1],
                r[0] + r[1] - r[2],
            ],
        });
    }
    Ok(refs)
}

/// `D(a) = 2(a₁a₂ + a₂a₃ + a₃a₁) − a₁² − a₂² − a₃²`, positive exactly when
/// the squared lengths form a valid triangle.
#[inline]
fn heron(a: [f64; 3]) -> f64 {
    2.0 * (a[0] * a[1] + a[1] * a[2] + a[2] * a[0]) - a[0] * a[0] - a[1] * a[1] - a[2] * a[2]
}

impl FaceRef {
    /// Current squared side lengths of this face.
    #[inline]
    pub fn squared_lengths(&self, coords: &DVector<f64>) -> [f64; 3] {
        [
            coords[self.sides[0]].exp(),
            coords[self.sides[1]].exp(),
            coords[self.sides[2]].exp(),
        ]
    }

    /// `B(a) = Σ P_i a_i`.
    #[inline]
    fn bilinear(&self, a: [f64; 3]) -> f64 {
        self.p[0] * a[0] + self.p[1] * a[1] + self.p[2] * a[2]
    }

    /// Face energy `area⁰ (B/D⁰ + B/D − 2)`, or a degeneracy error when the
    /// current lengths do not form a triangle.
    pub fn energy(&self, a: [f64; 3], face: usize) -> Result<f64> {
        let d = heron(a);
        if !(d > 0.0) || !d.is_finite() {
            return Err(MetricError::NumericalDegeneracy { face });
        }
        let b = self.bilinear(a);
        Ok(self.area0 * (b / self.d0 + b / d - 2.0))
    }

    /// Gradient of the face energy with respect to its three λ coordinates.
    pub fn gradient(&self, a: [f64; 3], face: usize) -> Result<[f64; 3]> {
        let d = heron(a);
        if !(d > 0.0) || !d.is_finite() {
            return Err(MetricError::NumericalDegeneracy { face });
        }
        let b = self.bilinear(a);
        let mut grad = [0.0; 3];
        for i in 0..3 {
            let di = 2.0 * (a[(i + 1) % 3] + a[(i + 2) % 3] - a[i]);
            grad[i] = a[i] * self.area0 * (self.p[i] / self.d0 + (self.p[i] * d - b * di) / (d * d));
        }
        Ok(grad)
    }

    /// Hessian of the face energy with respect to its three λ coordinates.
    pub fn hessian(&self, a: [f64; 3], face: usize) -> Result<[[f64; 3]; 3]> {
        let d = heron(a);
        if !(d > 0.0) || !d.is_finite() {
            return Err(MetricError::NumericalDegeneracy { face });
        }
        let b = self.bilinear(a);
        let grad = self.gradient(a, face)?;

        let di = |i: usize| 2.0 * (a[(i + 1) % 3] + a[(i + 2) % 3] - a[i]);
        let mut hess = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                let dij = if i == j { -2.0 } else { 2.0 };
                // ∂²(B/D)/∂a_i∂a_j by the quotient rule (B is linear in a).
                let g_ij = (self.p[i] * di(j) - self.p[j] * di(i) - b * dij) / (d * d)
                    - 2.0 * (self.p[i] * d - b * di(i)) * di(j) / (d * d * d);
                hess[i][j] = a[i] * a[j] * self.area0 * g_ij;
                if i == j {
                    hess[i][j] += grad[i];
                }
            }
        }
        Ok(hess)
    }
}

/// The full symmetric Dirichlet energy relative to a reference metric.
///
/// Requires the current coordinates to form valid triangles on the reference
/// connectivity; a violation surfaces as a numerical-degeneracy error, which
/// the descent driver treats as a rejected step.
pub struct SymDirichletEnergy {
    faces: Vec<FaceRef>,
    dimension: usize,
}

impl SymDirichletEnergy {
    /// Capture `metric` as the reference.
    pub fn new<I: MeshIndex>(metric: &ConeMetric<I>) -> Result<Self> {
        Ok(Self {
            faces: face_references(metric)?,
            dimension: metric.num_reduced_coordinates(),
        })
    }
}

impl<I: MeshIndex> EnergyFunctor<I> for SymDirichletEnergy {
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64> {
        check_dimension(metric, self.dimension)?;
        let coords = metric.reduced_metric_coordinates();
        let mut total = 0.0;
        for (f, fr) in self.faces.iter().enumerate() {
            total += fr.energy(fr.squared_lengths(coords), f)?;
        }
        Ok(total)
    }

    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>> {
        check_dimension(metric, self.dimension)?;
        let coords = metric.reduced_metric_coordinates();
        let mut grad = DVector::zeros(self.dimension);
        for (f, fr) in self.faces.iter().enumerate() {
            let g = fr.gradient(fr.squared_lengths(coords), f)?;
            for k in 0..3 {
                grad[fr.sides[k]] += g[k];
            }
        }
        Ok(grad)
    }

    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_dimension(metric, self.dimension)?;
        let coords = metric.reduced_metric_coordinates();
        let mut out = DVector::zeros(self.dimension);
        for (f, fr) in self.faces.iter().enumerate() {
            let h = fr.hessian(fr.squared_lengths(coords), f)?;
            let vf = [v[fr.sides[0]], v[fr.sides[1]], v[fr.sides[2]]];
            for i in 0..3 {
                let row = h[i];
                out[fr.sides[i]] += row[0] * vf[0] + row[1] * vf[1] + row[2] * vf[2];
            }
        }
        Ok(out)
    }
}

/// The quadratic (second-order) symmetric Dirichlet energy.
///
/// The per-face Hessian of [`SymDirichletEnergy`] is evaluated once at the
/// reference and frozen, making the energy an explicit quadratic form
/// `½ δᵀ H⁰ δ` in the coordinate change `δ = λ − λ⁰`.
pub struct QuadraticSymDirichletEnergy {
    pub(crate) faces: Vec<FaceRef>,
    pub(crate) face_hessians: Vec<[[f64; 3]; 3]>,
    pub(crate) reference: DVector<f64>,
    dimension: usize,
}

impl QuadraticSymDirichletEnergy {
    /// Capture `metric` as the reference and freeze the per-face Hessians.
    pub fn new<I: MeshIndex>(metric: &ConeMetric<I>) -> Result<Self> {
        let faces = face_references(metric)?;
        let face_hessians = faces
            .iter()
            .enumerate()
            .map(|(f, fr)| fr.hessian(fr.r, f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            faces,
            face_hessians,
            reference: metric.reduced_metric_coordinates().clone(),
            dimension: metric.num_reduced_coordinates(),
        })
    }

    /// The quadratic form value of one face for a coordinate change `delta`.
    pub(crate) fn face_quadratic(&self, f: usize, delta: &DVector<f64>) -> f64 {
        let fr = &self.faces[f];
        let h = &self.face_hessians[f];
        let d = [delta[fr.sides[0]], delta[fr.sides[1]], delta[fr.sides[2]]];
        let mut q = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                q += d[i] * h[i][j] * d[j];
            }
        }
        q
    }
}

impl<I: MeshIndex> EnergyFunctor<I> for QuadraticSymDirichletEnergy {
    fn energy(&self, metric: &ConeMetric<I>) -> Result<f64> {
        check_dimension(metric, self.dimension)?;
        let delta = metric.reduced_metric_coordinates() - &self.reference;
        let mut total = 0.0;
        for f in 0..self.faces.len() {
            total += 0.5 * self.face_quadratic(f, &delta);
        }
        Ok(total)
    }

    fn gradient(&self, metric: &ConeMetric<I>) -> Result<DVector<f64>> {
        check_dimension(metric, self.dimension)?;
        let delta = metric.reduced_metric_coordinates() - &self.reference;
        let mut grad = DVector::zeros(self.dimension);
        for (fr, h) in self.faces.iter().zip(&self.face_hessians) {
            let d = [delta[fr.sides[0]], delta[fr.sides[1]], delta[fr.sides[2]]];
            for i in 0..3 {
                grad[fr.sides[i]] += h[i][0] * d[0] + h[i][1] * d[1] + h[i][2] * d[2];
            }
        }
        Ok(grad)
    }

    fn hessian_vector_product(
        &self,
        metric: &ConeMetric<I>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_dimension(metric, self.dimension)?;
        let mut out = DVector::zeros(self.dimension);
        for (fr, h) in self.faces.iter().zip(&self.face_hessians) {
            let vf = [v[fr.sides[0]], v[fr.sides[1]], v[fr.sides[2]]];
            for i in 0..3 {
                out[fr.sides[i]] += h[i][0] * vf[0] + h[i][1] * vf[1] + h[i][2] * vf[2];
            }
        }
        Ok(out)
    }
}
