//! Constrained metric optimization.
//!
//! This module contains the two optimization styles built on top of the cone
//! metric:
//!
//! - **Implicit** ([`optimize_metric`]): projected descent over the reduced
//!   coordinates. Directions live in the tangent space of the angle-sum
//!   constraint manifold; every line-search trial point is made feasible by
//!   the projection operator before its energy is evaluated.
//! - **Explicit** ([`compute_shear_basis`], [`compute_optimization_domain`],
//!   [`sample_energy_grid`]): a shear/scale reparameterization in which the
//!   free directions can be set arbitrarily and a single projection restores
//!   feasibility, used to sample the energy landscape directly.
//!
//! The [`project_to_constraint`] operator is shared by both: a Newton
//! iteration on per-vertex conformal scale factors with Ptolemy flips keeping
//! the working triangulation non-degenerate.

mod constraint;
mod descent;
mod projection;
mod shear;

pub use constraint::{vertex_constraint, VertexConstraint};
pub use descent::{
    optimize_metric, DescentStatus, DirectionChoice, IterationRecord, OptimizationParameters,
    OptimizationResult,
};
pub use projection::{project_to_constraint, ProjectionParameters};
pub use shear::{
    compute_optimization_domain, compute_shear_basis, domain_coordinate_energy,
    sample_energy_grid, GridOptions, OptimizationDomain, ShearBasis,
};
