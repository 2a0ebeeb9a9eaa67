//! Cone-angle preprocessing.
//!
//! Target angles arrive from files with limited precision and occasionally
//! with values that were *meant* to be exact multiples of π/2 (flat vertices
//! at 2π in particular). This module snaps such values, determines which
//! cones are free, and validates the assignment against the discrete
//! Gauss-Bonnet relation before any optimization begins.

use std::f64::consts::PI;

use tracing::debug;

use crate::error::{MetricError, Result};
use crate::mesh::{Connectivity, MeshIndex};

/// Default tolerance for recognizing an angle as an intended multiple of π/2,
/// and for the flatness test `Θ̂ = 2π` that determines free cones.
pub const DEFAULT_CONE_EPSILON: f64 = 1e-8;

/// Absolute tolerance on the Gauss-Bonnet defect sum.
const GAUSS_BONNET_TOLERANCE: f64 = 1e-6;

/// Snap target angles to nearby multiples of π/2.
///
/// Cone assignments in practice are quarter-turn multiples written with
/// finite precision; snapping repairs the drift so flat vertices compare
/// exactly equal to 2π and the defect sum closes exactly. Angles further than
/// `epsilon` from any multiple are left untouched.
pub fn correct_cone_angles(target_angles: &[f64], epsilon: f64) -> Vec<f64> {
    let quarter = PI / 2.0;
    let mut snapped = 0usize;
    let corrected = target_angles
        .iter()
        .map(|&theta| {
            let m = (theta / quarter).round();
            if m > 0.0 && (theta - m * quarter).abs() < epsilon {
                if theta != m * quarter {
                    snapped += 1;
                }
                m * quarter
            } else {
                theta
            }
        })
        .collect();
    if snapped > 0 {
        debug!(snapped, "snapped cone angles to quarter-turn multiples");
    }
    corrected
}

/// Vertices whose target differs from the flat value 2π by more than
/// `epsilon`. These are the candidates for free cones when the caller opts
/// into letting cone angles float.
pub fn find_cone_vertices(target_angles: &[f64], epsilon: f64) -> Vec<usize> {
    target_angles
        .iter()
        .enumerate()
        .filter(|(_, &theta)| (theta - 2.0 * PI).abs() > epsilon)
        .map(|(v, _)| v)
        .collect()
}

/// Validate the shape of a target-angle assignment: one positive, finite
/// angle per vertex.
pub fn validate_angle_count<I: MeshIndex>(
    mesh: &Connectivity<I>,
    target_angles: &[f64],
) -> Result<()> {
    if target_angles.len() != mesh.num_vertices() {
        return Err(MetricError::InvalidTargetAngles {
            details: format!(
                "expected {} angles, got {}",
                mesh.num_vertices(),
                target_angles.len()
            ),
        });
    }
    for (v, &theta) in target_angles.iter().enumerate() {
        if !(theta > 0.0) || !theta.is_finite() {
            return Err(MetricError::InvalidTargetAngles {
                details: format!("angle at vertex {} is {}", v, theta),
            });
        }
    }
    Ok(())
}

/// Validate a target-angle assignment against the mesh.
///
/// Checks the count, positivity, and the discrete Gauss-Bonnet relation
/// `Σ (2π − Θ̂ᵥ) = 2π·χ`. A violation is fatal: no metric with these angle
/// sums exists on this surface. Only meaningful when every target is
/// enforced; with free cones the defect sum need not close, so callers skip
/// this in favor of [`validate_angle_count`].
pub fn validate_target_angles<I: MeshIndex>(
    mesh: &Connectivity<I>,
    target_angles: &[f64],
) -> Result<()> {
    validate_angle_count(mesh, target_angles)?;

    let defect_sum: f64 = target_angles.iter().map(|&theta| 2.0 * PI - theta).sum();
    let expected = 2.0 * PI * mesh.euler_characteristic() as f64;
    if (defect_sum - expected).abs() > GAUSS_BONNET_TOLERANCE {
        return Err(MetricError::InvalidTargetAngles {
            details: format!(
                "Gauss-Bonnet violated: defect sum {} but 2πχ = {}",
                defect_sum, expected
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;

    #[test]
    fn test_correct_snaps_near_flat() {
        let noisy = 2.0 * PI + 3e-9;
        let corrected = correct_cone_angles(&[noisy], DEFAULT_CONE_EPSILON);
        assert_eq!(corrected[0], 2.0 * PI);
    }

    #[test]
    fn test_correct_snaps_quarter_turns() {
        let corrected = correct_cone_angles(&[PI / 2.0 + 1e-10, 1.5 * PI - 1e-9], 1e-8);
        assert_eq!(corrected[0], PI / 2.0);
        assert_eq!(corrected[1], 1.5 * PI);
    }

    #[test]
    fn test_correct_leaves_general_cones_alone() {
        let theta = 1.2345;
        let corrected = correct_cone_angles(&[theta], DEFAULT_CONE_EPSILON);
        assert_eq!(corrected[0], theta);
    }

    #[test]
    fn test_find_cone_vertices() {
        let angles = vec![2.0 * PI, PI, 2.0 * PI, 3.0 * PI];
        let cones = find_cone_vertices(&angles, DEFAULT_CONE_EPSILON);
        assert_eq!(cones, vec![1, 3]);
    }

    #[test]
    fn test_validate_accepts_consistent_sphere() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
        // Four π-cones on a sphere: defect sum 4π = 2πχ.
        assert!(validate_target_angles(&mesh, &[PI; 4]).is_ok());
    }

    #[test]
    fn test_validate_rejects_two_pi_cones_on_sphere() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
        // Two π-cones with the rest flat: defect sum 2π, not 4π.
        let angles = vec![PI, PI, 2.0 * PI, 2.0 * PI];
        let result = validate_target_angles(&mesh, &angles);
        assert!(matches!(result, Err(MetricError::InvalidTargetAngles { .. })));
    }

    #[test]
    fn test_validate_rejects_wrong_count() {
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: Connectivity = build_from_triangles(&faces, 4).unwrap();
        let result = validate_target_angles(&mesh, &[PI; 3]);
        assert!(matches!(result, Err(MetricError::InvalidTargetAngles { .. })));
    }
}
