//! Core mesh data structures.
//!
//! This module provides the half-edge connectivity used by the metric layer.
//!
//! # Overview
//!
//! The primary type is [`Connectivity`], a half-edge (doubly-connected edge
//! list) representation of a *closed* triangulated surface. Unlike a general
//! geometry-processing mesh it stores no vertex positions: the optimizer works
//! on intrinsic per-edge coordinates, so the connectivity is purely
//! combinatorial and carries an explicit edge list to hang coordinates on.
//!
//! # Index Types
//!
//! Mesh elements are identified by type-safe index wrappers:
//! - [`VertexId`] - Identifies a vertex
//! - [`HalfEdgeId`] - Identifies a half-edge
//! - [`EdgeId`] - Identifies a full edge
//! - [`FaceId`] - Identifies a face
//!
//! These indices are generic over the underlying integer type ([`MeshIndex`]
//! trait), allowing `u32` or `u64` based on mesh size.
//!
//! # Boundary Handling
//!
//! Meshes with boundary are closed by the double construction
//! ([`closed_double`]): a mirrored copy is glued along the boundary and the
//! resulting reflection involution is retained so that mirrored edges can
//! share a single metric coordinate.

mod builder;
mod connectivity;
mod index;

pub use builder::{build_from_triangles, closed_double, edge_lengths_from_positions, ClosedMesh};
pub use connectivity::{Connectivity, Edge, Face, FlipQuad, HalfEdge, Vertex};
pub use index::{EdgeId, FaceId, HalfEdgeId, MeshIndex, VertexId};
