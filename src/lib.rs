//! Constraint projection for position-based dynamics (PBD).
//!
//! This crate is the constraint core of a PBD cloth/soft-body
//! simulator: given particles with predicted positions, it nudges
//! those positions so that geometric constraints are satisfied, using
//! mass-weighted, gradient-based corrections.
//!
//! # Physics Model
//!
//! PBD corrects predicted positions directly instead of integrating
//! forces. Each constraint exposes a scalar value `C` (zero when
//! satisfied) and its gradient; one projection step applies
//!
//! ```text
//! s  = C / (∇C · w · ∇C^T)
//! Δx = -k · s · w · ∇C^T
//! ```
//!
//! with inverse masses `w` and stiffness `k` in `[0, 1]`. Particles
//! with zero inverse mass are immovable.
//!
//! The outer engine owns the solve loop:
//!
//! ```text
//! For each time step:
//!   1. Predict positions: x* = x + v*dt + g*dt²   (external)
//!   2. For each solver iteration:
//!        for each constraint, in order: constraint.project(particles)
//!   3. Update velocities from corrected positions  (external)
//! ```
//!
//! Constraints are applied strictly sequentially and mutate shared
//! particle state in place, so within a pass later constraints see
//! already-corrected positions (Gauss-Seidel relaxation). The result
//! depends on the pass order; this crate never reorders or schedules
//! anything.
//!
//! # Constraint Types
//!
//! - [`DistanceConstraint`]: target separation between two particles
//!   (cloth edges, structural/shear springs)
//! - [`BendingConstraint`]: target dihedral angle between two
//!   triangles sharing an edge
//! - [`IsometricBendingConstraint`]: quadratic bending energy with a
//!   precomputed cotangent weight matrix, no per-iteration
//!   trigonometry
//! - [`FixedPointConstraint`]: pulls a particle toward a fixed point
//! - [`EnvironmentalCollisionConstraint`]: one-sided half-space
//!   (inequality) constraint
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::Point3;
//! use sim_pbd::{Constraint, DistanceConstraint, Particle};
//!
//! // Engine-owned particle collection; constraints hold indices.
//! let mut particles = vec![
//!     Particle::new(Point3::new(0.0, 0.0, 0.0), 1.0),
//!     Particle::new(Point3::new(1.5, 0.0, 0.0), 1.0),
//! ];
//!
//! let edge = Constraint::Distance(
//!     DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap(),
//! );
//!
//! // One Gauss-Seidel pass of the external solver loop.
//! edge.project(&mut particles);
//! assert!(edge.value(&particles).abs() < 1e-9);
//! ```
//!
//! # Error Handling
//!
//! The hot path (`value`/`gradient`/`project`) never fails: degenerate
//! geometry degrades to a zero gradient (no-op correction), except for
//! the distance constraint, which substitutes a random unit direction
//! so coincident particles still separate. Invalid construction
//! parameters are reported as [`PbdError`] by the constructors.
//!
//! # Concurrency
//!
//! Single-threaded by design. Constraints sharing a particle must not
//! be projected concurrently; any parallel schedule (graph coloring,
//! atomic accumulation) is the caller's responsibility.

#![doc(html_root_url = "https://docs.rs/sim-pbd/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
// Allow long functions for the constraint math.
#![allow(clippy::too_many_lines)]
#![cfg_attr(test, allow(clippy::uninlined_format_args, clippy::float_cmp))]

pub mod constraints;
pub mod error;
pub mod geometry;
pub mod particle;

// Re-export main types at crate root
pub use constraints::{
    BendingConstraint, Constraint, ConstraintType, DistanceConstraint,
    EnvironmentalCollisionConstraint, FixedPointConstraint, IsometricBendingConstraint,
};
pub use error::PbdError;
pub use particle::Particle;
