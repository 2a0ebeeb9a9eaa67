//! Angle-sum constraint evaluation.
//!
//! The constraint function maps reduced metric coordinates to the angle-sum
//! residual `F_v = Σ angles at v − Θ̂_v` over the constrained vertices. Both
//! the residual and its sparse Jacobian are computed on a Delaunay working
//! view of the metric; the Jacobian is pulled back through the view's flip
//! chain so its columns refer to the original reduced coordinates.

use nalgebra::DVector;

use crate::error::Result;
use crate::mesh::MeshIndex;
use crate::metric::{angle_jacobian, ConeMetric};
use crate::sparse::CsrMatrix;

/// Residual and derivatives of the angle-sum constraints at one metric.
#[derive(Debug, Clone)]
pub struct VertexConstraint {
    /// `angle_sum − target` per constrained vertex, in `constrained` order.
    pub residual: DVector<f64>,
    /// Sparse Jacobian of the residual with respect to the reduced metric
    /// coordinates (present when requested).
    pub jacobian: Option<CsrMatrix>,
    /// Internal indices of the constrained vertices.
    pub constrained: Vec<usize>,
    /// Largest absolute residual entry.
    pub max_violation: f64,
}

/// Evaluate the angle-sum constraints of a metric.
///
/// With `with_jacobian` the sparse residual Jacobian is assembled as well;
/// this requires building corner derivatives on the working triangulation and
/// mapping them through the flip chain, so skip it when only feasibility is
/// being checked.
pub fn vertex_constraint<I: MeshIndex>(
    metric: &ConeMetric<I>,
    with_jacobian: bool,
) -> Result<VertexConstraint> {
    let view = metric.view(true)?;
    let (angles, cots) = view.corner_data()?;

    let num_vertices = view.mesh().num_vertices();
    let mut sums = vec![0.0; num_vertices];
    for f in view.mesh().face_ids() {
        let hs = view.mesh().face_halfedges(f);
        for k in 0..3 {
            let apex = view.mesh().origin(hs[(k + 2) % 3]);
            sums[apex.index()] += angles[f.index()][k];
        }
    }

    let constrained = metric.constrained_vertices();
    let mut row_of_vertex = vec![usize::MAX; num_vertices];
    for (row, &v) in constrained.iter().enumerate() {
        row_of_vertex[v] = row;
    }

    let residual = DVector::from_iterator(
        constrained.len(),
        constrained.iter().map(|&v| sums[v] - metric.target_angles()[v]),
    );
    let max_violation = residual.amax();

    let jacobian = if with_jacobian {
        debug_assert!(view.chain_valid());
        let mut triplets = Vec::new();
        for f in view.mesh().face_ids() {
            let hs = view.mesh().face_halfedges(f);
            let jac = angle_jacobian(cots[f.index()]);
            for k in 0..3 {
                let apex = view.mesh().origin(hs[(k + 2) % 3]);
                let row = row_of_vertex[apex.index()];
                if row == usize::MAX {
                    continue;
                }
                for j in 0..3 {
                    let coef = jac[k][j];
                    let edge = view.mesh().edge_of(hs[j]).index();
                    for &(col, weight) in view.chain.row(edge) {
                        triplets.push((row, col, coef * weight));
                    }
                }
            }
        }
        Some(CsrMatrix::from_triplets(
            constrained.len(),
            metric.num_reduced_coordinates(),
            triplets,
        ))
    } else {
        None
    };

    Ok(VertexConstraint {
        residual,
        jacobian,
        constrained,
        max_violation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;
    use crate::metric::MetricMode;
    use std::f64::consts::PI;

    fn tetrahedron_metric() -> ConeMetric {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh = build_from_triangles(&faces, 4).unwrap();
        let lengths = vec![1.0; mesh.num_edges()];
        ConeMetric::from_lengths(mesh, &lengths, vec![PI; 4], &[], MetricMode::Penner).unwrap()
    }

    #[test]
    fn test_residual_zero_at_exact_metric() {
        let metric = tetrahedron_metric();
        let constraint = vertex_constraint(&metric, false).unwrap();
        assert_eq!(constraint.constrained.len(), 4);
        assert!(constraint.max_violation < 1e-12);
        assert!(constraint.jacobian.is_none());
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let metric = tetrahedron_metric();
        // Perturb so the Jacobian is generic.
        let mut coords = metric.reduced_metric_coordinates().clone();
        for i in 0..coords.len() {
            coords[i] += 0.1 * ((i as f64) * 0.9).sin();
        }
        let moved = metric.with_coordinates(coords.clone()).unwrap();

        let constraint = vertex_constraint(&moved, true).unwrap();
        let jac = constraint.jacobian.unwrap();

        let h = 1e-6;
        for col in 0..coords.len() {
            let mut plus = coords.clone();
            let mut minus = coords.clone();
            plus[col] += h;
            minus[col] -= h;
            let rp = vertex_constraint(&metric.with_coordinates(plus).unwrap(), false)
                .unwrap()
                .residual;
            let rm = vertex_constraint(&metric.with_coordinates(minus).unwrap(), false)
                .unwrap()
                .residual;
            for row in 0..constraint.constrained.len() {
                let fd = (rp[row] - rm[row]) / (2.0 * h);
                let analytic: f64 = jac
                    .row_entries(row)
                    .filter(|&(c, _)| c == col)
                    .map(|(_, v)| v)
                    .sum();
                assert!(
                    (fd - analytic).abs() < 1e-5,
                    "J[{},{}]: fd {} vs analytic {}",
                    row,
                    col,
                    fd,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_jacobian_rows_annihilate_uniform_scaling() {
        // Angles are invariant under a global scale, so J · 1 = 0.
        let metric = tetrahedron_metric();
        let mut coords = metric.reduced_metric_coordinates().clone();
        for i in 0..coords.len() {
            coords[i] += 0.05 * (i as f64);
        }
        let moved = metric.with_coordinates(coords).unwrap();
        let constraint = vertex_constraint(&moved, true).unwrap();
        let jac = constraint.jacobian.unwrap();

        let ones = DVector::from_element(moved.num_reduced_coordinates(), 1.0);
        assert!(jac.mul_vec(&ones).amax() < 1e-10);
    }

    #[test]
    fn test_free_cones_drop_constraint_rows() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh = build_from_triangles::<u32>(&faces, 4).unwrap();
        let lengths = vec![1.0; mesh.num_edges()];
        let metric =
            ConeMetric::from_lengths(mesh, &lengths, vec![PI; 4], &[1, 3], MetricMode::Penner)
                .unwrap();
        let constraint = vertex_constraint(&metric, false).unwrap();
        assert_eq!(constraint.constrained, vec![0, 2]);
        assert_eq!(constraint.residual.len(), 2);
    }
}
