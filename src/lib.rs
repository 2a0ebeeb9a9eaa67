//! # Flatiron
//!
//! Cone metric optimization in Penner coordinates for approximately
//! isometric, seamless surface parameterization.
//!
//! Flatiron computes discrete conformal metrics on triangle meshes with
//! prescribed vertex cone angles. The metric is represented by one
//! logarithmic coordinate per independent edge; a constrained descent loop
//! minimizes a selectable distortion energy while a Newton-type projection
//! keeps the per-vertex angle sums at their targets, flipping edges as needed
//! to keep the triangulation well defined.
//!
//! ## Quick Start
//!
//! ```
//! use flatiron::prelude::*;
//! use nalgebra::Point3;
//! use std::f64::consts::PI;
//!
//! // An irregular tetrahedron with a π cone at every vertex.
//! let positions = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.1, 0.0, 0.0),
//!     Point3::new(0.4, 0.9, 0.0),
//!     Point3::new(0.5, 0.4, 1.2),
//! ];
//! let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
//! let targets = vec![PI; 4];
//!
//! let (metric, _vtx_reindex) = initial_cone_metric::<u32>(
//!     &positions, &faces, &targets, &[], MetricMode::Penner, true,
//! ).unwrap();
//!
//! // Minimize log-length distortion subject to the angle constraints.
//! let energy = generate_energy(&metric, EnergyChoice::LogLength).unwrap();
//! let result = optimize_metric(
//!     &metric,
//!     energy.as_ref(),
//!     &ProjectionParameters::default(),
//!     &OptimizationParameters::default(),
//! ).unwrap();
//!
//! // The optimized metric satisfies the cone angles.
//! let residual = result.metric.constraint_residual().unwrap();
//! assert!(residual.amax() < 1e-6);
//! ```
//!
//! ## Modules
//!
//! - [`mesh`]: half-edge connectivity with the double construction for
//!   meshes with boundary
//! - [`metric`]: the differentiable cone metric and its flip machinery
//! - [`energy`]: distortion energy functors
//! - [`optimize`]: projection, projected descent, and the shear/scale
//!   decomposition
//! - [`cones`]: target-angle correction and validation
//! - [`io`]: the narrow file interfaces shared with collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cones;
pub mod energy;
pub mod error;
pub mod io;
pub mod mesh;
pub mod metric;
pub mod optimize;
pub mod sparse;

/// Prelude module for convenient imports.
///
/// ```
/// use flatiron::prelude::*;
/// ```
pub mod prelude {
    pub use crate::energy::{generate_energy, EnergyChoice, EnergyFunctor};
    pub use crate::error::{MetricError, Result};
    pub use crate::mesh::{Connectivity, EdgeId, FaceId, HalfEdgeId, MeshIndex, VertexId};
    pub use crate::metric::{initial_cone_metric, ConeMetric, MetricMode};
    pub use crate::optimize::{
        optimize_metric, project_to_constraint, DirectionChoice, OptimizationParameters,
        ProjectionParameters,
    };
}

// Re-export nalgebra types for convenience
pub use nalgebra;
