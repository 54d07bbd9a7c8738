//! Point-mass particle state shared by the engine and the constraints.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point mass simulated by position-based dynamics.
///
/// Particles are owned by the engine in one contiguous collection;
/// constraints reference them by index. The outer integrator advances
/// `velocity` and seeds `predicted_position` each step; constraint
/// projection then corrects `predicted_position` in place.
///
/// `rest_position` is the reference configuration. Constraints that
/// precompute rest-state quantities (rest dihedral angle, isometric
/// bending weights) read it once at construction and never again.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Particle {
    /// Position in the rest/reference configuration.
    pub rest_position: Point3<f64>,
    /// Position currently being corrected by the solver.
    pub predicted_position: Point3<f64>,
    /// Velocity, advanced by the external integrator (unused here).
    pub velocity: Vector3<f64>,
    /// Reciprocal of the mass; `0.0` means immovable.
    pub inverse_mass: f64,
}

impl Particle {
    /// Create a particle at `position` with the given mass.
    ///
    /// The predicted position starts at the rest position and the
    /// velocity at zero. A non-positive mass yields an immovable
    /// particle, same as [`Particle::pinned`].
    #[must_use]
    pub fn new(position: Point3<f64>, mass: f64) -> Self {
        let inverse_mass = if mass > 0.0 { 1.0 / mass } else { 0.0 };
        Self {
            rest_position: position,
            predicted_position: position,
            velocity: Vector3::zeros(),
            inverse_mass,
        }
    }

    /// Create an immovable particle at `position`.
    #[must_use]
    pub fn pinned(position: Point3<f64>) -> Self {
        Self {
            rest_position: position,
            predicted_position: position,
            velocity: Vector3::zeros(),
            inverse_mass: 0.0,
        }
    }

    /// Whether this particle is immovable (zero inverse mass).
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.inverse_mass == 0.0
    }
}
