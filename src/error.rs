//! Error types for flatiron.
//!
//! This module defines all error types used throughout the library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`MetricError`].
pub type Result<T> = std::result::Result<T, MetricError>;

/// Errors that can occur during metric construction and optimization.
#[derive(Error, Debug)]
pub enum MetricError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// The mesh has non-manifold topology.
    #[error("mesh has non-manifold topology: {details}")]
    NonManifold {
        /// Description of the non-manifold condition.
        details: String,
    },

    /// Target angles are malformed or inconsistent with the mesh topology.
    #[error("invalid target angles: {details}")]
    InvalidTargetAngles {
        /// Description of the inconsistency.
        details: String,
    },

    /// A metric update produced lengths violating the triangle inequality.
    ///
    /// Reported with the offending face so the caller can shrink its step.
    #[error("degenerate metric: triangle inequality violated in face {face}")]
    NumericalDegeneracy {
        /// The face whose lengths fail the triangle inequality.
        face: usize,
    },

    /// An edge flip was requested that the current mode does not permit.
    #[error("edge flip rejected for edge {edge}: {reason}")]
    FlipRejected {
        /// The edge for which the flip was requested.
        edge: usize,
        /// Why the flip is not allowed.
        reason: &'static str,
    },

    /// The Delaunay flip loop exceeded its safety bound.
    #[error("edge flip limit exceeded after {flips} flips")]
    FlipLimit {
        /// Number of flips performed before giving up.
        flips: usize,
    },

    /// An iterative solver or projection failed to converge.
    #[error("failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// A linear system was numerically singular or indefinite.
    #[error("singular linear system: {details}")]
    SingularSystem {
        /// Description of the failing solve.
        details: String,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error loading data from a file.
    #[error("failed to load {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl MetricError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MetricError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
