//! Triangle angle formulas in logarithmic length coordinates.
//!
//! All functions here work on per-face triples of metric coordinates
//! λ = 2·log ℓ. Angles are scale invariant, so every formula first shifts the
//! triple by its mean before exponentiating; this keeps intermediate lengths
//! near unity even when the coordinates themselves are far from zero.

/// Exponentiate a coordinate triple into side lengths after a stabilizing
/// shift. The shift drops out of every angle computation.
#[inline]
fn shifted_lengths(lambda: [f64; 3]) -> [f64; 3] {
    let shift = (lambda[0] + lambda[1] + lambda[2]) / 3.0;
    [
        ((lambda[0] - shift) / 2.0).exp(),
        ((lambda[1] - shift) / 2.0).exp(),
        ((lambda[2] - shift) / 2.0).exp(),
    ]
}

/// Compute the interior angles of a triangle with coordinates `lambda`
/// (λ = 2·log ℓ per side).
///
/// Returns `[alpha_a, alpha_b, alpha_c]` where `alpha_a` is the angle
/// *opposite* the first side, and so on. Returns `None` when the side lengths
/// violate the triangle inequality (a degenerate metric).
///
/// Uses the half-angle form `α = 2·atan2(√((s−b)(s−c)), √(s(s−a)))`, which is
/// stable for needle-shaped triangles where the law of cosines loses digits.
pub fn triangle_angles(lambda: [f64; 3]) -> Option<[f64; 3]> {
    let [a, b, c] = shifted_lengths(lambda);
    let s = 0.5 * (a + b + c);
    let (sa, sb, sc) = (s - a, s - b, s - c);
    if !(sa > 0.0 && sb > 0.0 && sc > 0.0) {
        return None;
    }

    let angle = |opp: f64, adj1: f64, adj2: f64| {
        2.0 * f64::atan2((adj1 * adj2).sqrt(), (s * opp).sqrt())
    };
    Some([angle(sa, sb, sc), angle(sb, sc, sa), angle(sc, sa, sb)])
}

/// Cotangents of the three angles returned by [`triangle_angles`].
#[inline]
pub fn triangle_cotangents(angles: [f64; 3]) -> [f64; 3] {
    [
        angles[0].cos() / angles[0].sin(),
        angles[1].cos() / angles[1].sin(),
        angles[2].cos() / angles[2].sin(),
    ]
}

/// Jacobian of the triangle angles with respect to the coordinates.
///
/// Entry `[i][j]` is `∂alpha_i/∂λ_j`. With cotangents `(ca, cb, cc)` of the
/// three angles, the angle opposite a side grows with that side's coordinate
/// and shrinks with the adjacent ones:
///
/// `∂alpha_a/∂λ_a = (cb + cc)/2`, `∂alpha_a/∂λ_b = -cc/2`,
/// `∂alpha_a/∂λ_c = -cb/2`.
///
/// Each row sums to zero, reflecting the scale invariance of angles.
#[inline]
pub fn angle_jacobian(cot: [f64; 3]) -> [[f64; 3]; 3] {
    let [ca, cb, cc] = cot;
    [
        [(cb + cc) / 2.0, -cc / 2.0, -cb / 2.0],
        [-cc / 2.0, (ca + cc) / 2.0, -ca / 2.0],
        [-cb / 2.0, -ca / 2.0, (ca + cb) / 2.0],
    ]
}

/// Ptolemy flip of the diagonal coordinate of a quad.
///
/// For a quad with outer coordinates `[a, b, c, d]` (as reported by
/// [`crate::mesh::FlipQuad`]) and diagonal coordinate `e`, the new diagonal
/// length satisfies `ℓ' ℓ = ℓ_a ℓ_c + ℓ_b ℓ_d`. In coordinates this is a
/// log-sum-exp, evaluated with the usual max shift.
///
/// Returns `(lambda_new, w)` where `w ∈ (0, 1)` is the derivative weight of
/// the `(a, c)` pair: `∂λ'/∂λ_a = ∂λ'/∂λ_c = w`, `∂λ'/∂λ_b = ∂λ'/∂λ_d = 1−w`,
/// and `∂λ'/∂λ_e = −1`.
pub fn ptolemy_flip(quad: [f64; 4], diagonal: f64) -> (f64, f64) {
    let [a, b, c, d] = quad;
    let ac = (a + c) / 2.0;
    let bd = (b + d) / 2.0;
    let m = ac.max(bd);
    let ea = (ac - m).exp();
    let eb = (bd - m).exp();
    let lambda_new = 2.0 * (m + (ea + eb).ln()) - diagonal;
    (lambda_new, ea / (ea + eb))
}

/// Euclidean flip of the diagonal coordinate of a quad.
///
/// Computes the length of the opposite diagonal by laying the two triangles
/// flat, which is only possible when the quad is convex and the resulting
/// triangles are non-degenerate. Returns `None` when the flip would create an
/// invalid triangulation, which the discrete-length mode treats as a rejected
/// flip.
pub fn euclidean_flip(quad: [f64; 4], diagonal: f64) -> Option<f64> {
    let [la, lb, lc, ld] = quad;

    // Angles at the two shared corners of the quad. With half-edge labels
    // (e={v0,v1}, a={v1,v2}, b={v2,v0}) and (e, c={v0,v3}, d={v3,v1}), the
    // corner at v0 is opposite a resp. d, the corner at v1 opposite b resp. c.
    let t0 = triangle_angles([la, lb, diagonal])?;
    let t1 = triangle_angles([ld, diagonal, lc])?;
    let theta = t0[0] + t1[0];
    // Both shared corners must be convex or the new diagonal leaves the quad.
    if theta >= std::f64::consts::PI || t0[1] + t1[2] >= std::f64::consts::PI {
        return None;
    }

    // New diagonal from the law of cosines on the flattened quad; work in a
    // shifted scale to avoid overflow.
    let shift = (lb + lc) / 2.0;
    let b = ((lb - shift) / 2.0).exp();
    let c = ((lc - shift) / 2.0).exp();
    let new_sq = b * b + c * c - 2.0 * b * c * theta.cos();
    if !(new_sq > 0.0) {
        return None;
    }
    let lambda_new = new_sq.ln() + shift;

    // The two new triangles must satisfy the triangle inequality.
    triangle_angles([lc, lambda_new, lb])?;
    triangle_angles([ld, la, lambda_new])?;
    Some(lambda_new)
}

/// Whether an edge satisfies the intrinsic Delaunay condition, tested on
/// λ-lengths directly.
///
/// For quad coordinates `[a, b, c, d]` around diagonal `e` the condition is
///
/// `(ℓa² + ℓb² − ℓe²)/(ℓa ℓb) + (ℓc² + ℓd² − ℓe²)/(ℓc ℓd) ≥ −tol`,
///
/// which equals `2(cos α + cos β)` for the two opposite angles when the
/// triangles are valid, and has the same sign as `cot α + cot β`. Unlike the
/// cotangent form it needs no triangle areas, so it is defined for arbitrary
/// Penner coordinates even before the triangle inequalities hold.
pub fn is_delaunay_quad(quad: [f64; 4], diagonal: f64, tol: f64) -> bool {
    let shift = (quad[0] + quad[1] + quad[2] + quad[3] + diagonal) / 5.0;
    let l = |lam: f64| ((lam - shift) / 2.0).exp();
    let (a, b, c, d, e) = (l(quad[0]), l(quad[1]), l(quad[2]), l(quad[3]), l(diagonal));
    let lhs = (a * a + b * b - e * e) / (a * b) + (c * c + d * d - e * e) / (c * d);
    lhs >= -tol
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// λ coordinate of a plain length.
    fn lam(l: f64) -> f64 {
        2.0 * l.ln()
    }

    #[test]
    fn test_equilateral_angles() {
        let angles = triangle_angles([0.0, 0.0, 0.0]).unwrap();
        for a in angles {
            assert!((a - PI / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_right_triangle_angles() {
        // 3-4-5 right triangle: the angle opposite the hypotenuse is π/2.
        let angles = triangle_angles([lam(3.0), lam(4.0), lam(5.0)]).unwrap();
        assert!((angles[2] - PI / 2.0).abs() < 1e-12);
        assert!((angles[0] + angles[1] + angles[2] - PI).abs() < 1e-12);
    }

    #[test]
    fn test_angles_scale_invariant() {
        let base = [lam(3.0), lam(4.0), lam(5.0)];
        let shifted = [base[0] + 100.0, base[1] + 100.0, base[2] + 100.0];
        let a0 = triangle_angles(base).unwrap();
        let a1 = triangle_angles(shifted).unwrap();
        for k in 0..3 {
            assert!((a0[k] - a1[k]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_degenerate_triangle_rejected() {
        // 1-1-3 violates the triangle inequality.
        assert!(triangle_angles([lam(1.0), lam(1.0), lam(3.0)]).is_none());
    }

    #[test]
    fn test_angle_jacobian_rows_sum_to_zero() {
        let angles = triangle_angles([lam(2.0), lam(3.0), lam(4.0)]).unwrap();
        let jac = angle_jacobian(triangle_cotangents(angles));
        for row in jac {
            assert!((row[0] + row[1] + row[2]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_angle_jacobian_matches_finite_differences() {
        let base = [lam(2.0), lam(3.0), lam(4.0)];
        let angles = triangle_angles(base).unwrap();
        let jac = angle_jacobian(triangle_cotangents(angles));

        let h = 1e-6;
        for j in 0..3 {
            let mut plus = base;
            let mut minus = base;
            plus[j] += h;
            minus[j] -= h;
            let ap = triangle_angles(plus).unwrap();
            let am = triangle_angles(minus).unwrap();
            for i in 0..3 {
                let fd = (ap[i] - am[i]) / (2.0 * h);
                assert!(
                    (fd - jac[i][j]).abs() < 1e-6,
                    "d alpha_{}/d lambda_{}: fd {} vs analytic {}",
                    i,
                    j,
                    fd,
                    jac[i][j]
                );
            }
        }
    }

    #[test]
    fn test_ptolemy_flip_square() {
        // Unit square with unit diagonal coordinates: ℓ' = (1·1 + 1·1)/1 = 2.
        let (new_lambda, w) = ptolemy_flip([0.0, 0.0, 0.0, 0.0], 0.0);
        assert!((new_lambda - 2.0 * 2.0_f64.ln()).abs() < 1e-12);
        assert!((w - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ptolemy_flip_involution() {
        // Flipping twice divides back out: λ'' = λ when the quad is fixed.
        let quad = [lam(1.1), lam(0.9), lam(1.3), lam(0.8)];
        let e = lam(1.2);
        let (e1, _) = ptolemy_flip(quad, e);
        let (e2, _) = ptolemy_flip(quad, e1);
        assert!((e2 - e).abs() < 1e-12);
    }

    #[test]
    fn test_ptolemy_weight_matches_finite_differences() {
        let quad = [lam(1.1), lam(0.9), lam(1.3), lam(0.8)];
        let e = lam(1.2);
        let (_, w) = ptolemy_flip(quad, e);

        let h = 1e-7;
        let mut qa = quad;
        qa[0] += h;
        let (fa, _) = ptolemy_flip(qa, e);
        let mut qb = quad;
        qb[1] += h;
        let (fb, _) = ptolemy_flip(qb, e);
        let (f0, _) = ptolemy_flip(quad, e);

        assert!(((fa - f0) / h - w).abs() < 1e-5);
        assert!(((fb - f0) / h - (1.0 - w)).abs() < 1e-5);
    }

    #[test]
    fn test_euclidean_flip_square() {
        // Unit square with diagonal √2: the opposite diagonal is also √2.
        let quad = [0.0; 4];
        let e = lam(2.0_f64.sqrt());
        let new_lambda = euclidean_flip(quad, e).unwrap();
        assert!((new_lambda - e).abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_flip_rejects_nonconvex() {
        // Two obtuse triangles meeting at a reflex corner: the angles at the
        // shared vertex sum past π, so the opposite diagonal leaves the quad.
        let quad = [lam(1.9), lam(1.0), lam(1.0), lam(1.9)];
        let e = lam(1.0);
        assert!(euclidean_flip(quad, e).is_none());
    }

    #[test]
    fn test_delaunay_condition() {
        // Two equilateral triangles sharing an edge are Delaunay.
        assert!(is_delaunay_quad([0.0; 4], 0.0, 0.0));
        // A long diagonal in a unit rhombus makes opposite angles sum past π.
        assert!(!is_delaunay_quad([0.0; 4], lam(1.8), 0.0));
        // After flipping to the short diagonal the quad is Delaunay again.
        let (short, _) = ptolemy_flip([0.0; 4], lam(1.8));
        assert!(is_delaunay_quad([0.0; 4], short, 0.0));
    }
}
