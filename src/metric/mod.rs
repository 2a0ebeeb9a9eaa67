//! The cone metric data model.
//!
//! A cone metric assigns one logarithmic coordinate (λ = 2·log ℓ) to each
//! independent edge of a closed triangulation, together with per-vertex target
//! angles. [`ConeMetric`] is the central type: it computes corner angles,
//! angle-sum residuals and their derivatives, and supports edge flips that
//! keep the triangulation well defined.
//!
//! Two coordinate interpretations are supported ([`MetricMode`]):
//!
//! - **Penner**: coordinates are unrestricted. Angles are computed on a
//!   working copy flipped to an intrinsic Delaunay triangulation; Ptolemy
//!   flips leave the underlying metric unchanged, so this is a change of
//!   chart rather than a change of metric.
//! - **DiscreteLength**: coordinates are log lengths on a fixed connectivity,
//!   and every face must satisfy the triangle inequality; violations raise a
//!   [`crate::error::MetricError::NumericalDegeneracy`] identifying the face.

mod angles;
mod cone;
mod reduction;

pub use angles::{
    angle_jacobian, euclidean_flip, is_delaunay_quad, ptolemy_flip, triangle_angles,
    triangle_cotangents,
};
pub use cone::{initial_cone_metric, ConeMetric, MetricMode, MetricView};
pub use reduction::ReductionMap;
