//! Geometric constraints and the PBD projection routine.
//!
//! This module provides the position-based dynamics (PBD) constraints
//! used for cloth and soft-body simulation:
//!
//! - [`DistanceConstraint`] - Maintains distance between two particles
//! - [`BendingConstraint`] - Maintains the dihedral angle between two triangles
//! - [`IsometricBendingConstraint`] - Quadratic bending energy, trigonometry-free
//! - [`FixedPointConstraint`] - Pins a particle toward a target point
//! - [`EnvironmentalCollisionConstraint`] - One-sided half-space constraint
//!
//! # PBD Constraint Projection
//!
//! Each constraint reports a scalar value `C` and its gradient, and is
//! projected with the mass-weighted first-order step:
//!
//! ```text
//! s  = C / (∇C · w · ∇C^T)
//! Δx = -k · s · w · ∇C^T
//! ```
//!
//! Where:
//! - `C` is the constraint function (zero when satisfied)
//! - `∇C` is the constraint gradient, one 3-vector per particle
//! - `w` are inverse masses, baked at construction
//! - `k` is the stiffness in `[0, 1]`
//!
//! Projections mutate predicted positions in place, so constraints
//! applied later in a pass see already-corrected positions
//! (Gauss-Seidel relaxation). The pass order is the caller's choice
//! and changes the exact result for a finite iteration count.

use nalgebra::{Matrix4, Point3, Vector3, Vector4};
use rand::Rng;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{PbdError, Result};
use crate::geometry::{cot_theta, normalized_cross_jacobians, triangle_normal, DEGENERACY_EPS};
use crate::particle::Particle;

/// Type of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintType {
    /// Distance constraint between two particles.
    Distance,
    /// Dihedral-angle bending constraint over four particles.
    Bending,
    /// Quadratic isometric bending constraint over four particles.
    IsometricBending,
    /// Attachment of one particle to a fixed point.
    FixedPoint,
    /// Half-space collision constraint on one particle.
    EnvironmentalCollision,
}

/// A constraint that can be projected with the PBD step.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Constraint {
    /// Distance constraint.
    Distance(DistanceConstraint),
    /// Dihedral-angle bending constraint.
    Bending(BendingConstraint),
    /// Isometric bending constraint.
    IsometricBending(IsometricBendingConstraint),
    /// Fixed-point constraint.
    FixedPoint(FixedPointConstraint),
    /// Environmental collision constraint.
    EnvironmentalCollision(EnvironmentalCollisionConstraint),
}

impl Constraint {
    /// Get the type of this constraint.
    #[must_use]
    pub const fn constraint_type(&self) -> ConstraintType {
        match self {
            Self::Distance(_) => ConstraintType::Distance,
            Self::Bending(_) => ConstraintType::Bending,
            Self::IsometricBending(_) => ConstraintType::IsometricBending,
            Self::FixedPoint(_) => ConstraintType::FixedPoint,
            Self::EnvironmentalCollision(_) => ConstraintType::EnvironmentalCollision,
        }
    }

    /// Get the particle indices referenced by this constraint, in
    /// gradient order.
    #[must_use]
    pub fn vertices(&self) -> SmallVec<[usize; 4]> {
        match self {
            Self::Distance(c) => SmallVec::from_slice(&c.indices),
            Self::Bending(c) => SmallVec::from_slice(&c.indices),
            Self::IsometricBending(c) => SmallVec::from_slice(&c.indices),
            Self::FixedPoint(c) => SmallVec::from_slice(&c.indices),
            Self::EnvironmentalCollision(c) => SmallVec::from_slice(&c.indices),
        }
    }

    /// Get the number of particles this constraint touches.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.vertices().len()
    }

    /// Get the stiffness of this constraint.
    #[must_use]
    pub const fn stiffness(&self) -> f64 {
        match self {
            Self::Distance(c) => c.stiffness,
            Self::Bending(c) => c.stiffness,
            Self::IsometricBending(c) => c.stiffness,
            Self::FixedPoint(c) => c.stiffness,
            Self::EnvironmentalCollision(c) => c.stiffness,
        }
    }

    /// Compute the constraint value `C` for the current predicted
    /// positions.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        match self {
            Self::Distance(c) => c.value(particles),
            Self::Bending(c) => c.value(particles),
            Self::IsometricBending(c) => c.value(particles),
            Self::FixedPoint(c) => c.value(particles),
            Self::EnvironmentalCollision(c) => c.value(particles),
        }
    }

    /// Compute the constraint gradient, one 3-vector per referenced
    /// particle, in the same order as [`Constraint::vertices`].
    #[must_use]
    pub fn gradient(&self, particles: &[Particle]) -> SmallVec<[Vector3<f64>; 4]> {
        match self {
            Self::Distance(c) => SmallVec::from_slice(&c.gradient(particles)),
            Self::Bending(c) => SmallVec::from_slice(&c.gradient(particles)),
            Self::IsometricBending(c) => SmallVec::from_slice(&c.gradient(particles)),
            Self::FixedPoint(c) => SmallVec::from_slice(&c.gradient(particles)),
            Self::EnvironmentalCollision(c) => SmallVec::from_slice(&c.gradient(particles)),
        }
    }

    /// Project the referenced particles' predicted positions by one
    /// PBD step.
    pub fn project(&self, particles: &mut [Particle]) {
        match self {
            Self::Distance(c) => c.project(particles),
            Self::Bending(c) => c.project(particles),
            Self::IsometricBending(c) => c.project(particles),
            Self::FixedPoint(c) => c.project(particles),
            Self::EnvironmentalCollision(c) => c.project(particles),
        }
    }
}

/// Read the inverse masses for `indices`, validating bounds.
///
/// The result is baked into the constraint at construction and never
/// re-read during projection.
fn bake_inverse_masses<const N: usize>(
    particles: &[Particle],
    indices: &[usize; N],
) -> Result<[f64; N]> {
    let mut inverse_masses = [0.0; N];
    for (w, &index) in inverse_masses.iter_mut().zip(indices.iter()) {
        let particle = particles.get(index).ok_or_else(|| {
            PbdError::index_out_of_bounds(format!(
                "index {index} exceeds particle count {}",
                particles.len()
            ))
        })?;
        *w = particle.inverse_mass;
    }
    Ok(inverse_masses)
}

fn validate_stiffness(stiffness: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&stiffness) {
        return Err(PbdError::invalid_constraint(format!(
            "stiffness {stiffness} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Apply the mass-weighted PBD correction for one constraint.
///
/// No-op when the gradient is numerically zero or every referenced
/// particle is pinned; otherwise the output is finite for any finite
/// input. Pinned particles (zero inverse mass) are never moved.
fn project_positions<const N: usize>(
    c: f64,
    grad_c: &[Vector3<f64>; N],
    inverse_masses: &[f64; N],
    stiffness: f64,
    indices: &[usize; N],
    particles: &mut [Particle],
) {
    let grad_norm_squared: f64 = grad_c.iter().map(Vector3::norm_squared).sum();
    if grad_norm_squared < DEGENERACY_EPS {
        return;
    }

    // Denominator of s: grad_C^T * diag(w) * grad_C
    let denominator: f64 = grad_c
        .iter()
        .zip(inverse_masses.iter())
        .map(|(g, w)| w * g.norm_squared())
        .sum();
    if denominator < DEGENERACY_EPS {
        return;
    }

    let s = c / denominator;

    for j in 0..N {
        let delta = grad_c[j] * (-stiffness * s * inverse_masses[j]);
        particles[indices[j]].predicted_position += delta;
    }
}

/// Uniformly distributed unit direction, via rejection sampling.
fn random_unit_direction() -> Vector3<f64> {
    let mut rng = rand::thread_rng();
    loop {
        let v: Vector3<f64> = Vector3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        let norm_squared = v.norm_squared();
        if norm_squared > 0.01 && norm_squared <= 1.0 {
            return v / norm_squared.sqrt();
        }
    }
}

/// Distance constraint between two particles.
///
/// Maintains the separation of two particles at the rest distance.
/// Used for cloth edges and structural/shear springs.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceConstraint {
    /// Indices of the two particles.
    pub indices: [usize; 2],
    /// Stiffness in `[0, 1]`.
    pub stiffness: f64,
    /// Rest distance (target separation).
    pub rest_distance: f64,
    inverse_masses: [f64; 2],
}

impl DistanceConstraint {
    /// Create a distance constraint with an explicit rest distance.
    ///
    /// # Errors
    ///
    /// Returns an error when an index is out of bounds, the stiffness
    /// is outside `[0, 1]`, or the rest distance is negative or
    /// non-finite.
    pub fn new(
        particles: &[Particle],
        i0: usize,
        i1: usize,
        stiffness: f64,
        rest_distance: f64,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        if !rest_distance.is_finite() || rest_distance < 0.0 {
            return Err(PbdError::invalid_constraint(format!(
                "rest distance {rest_distance} must be finite and non-negative"
            )));
        }
        let indices = [i0, i1];
        let inverse_masses = bake_inverse_masses(particles, &indices)?;
        Ok(Self {
            indices,
            stiffness,
            rest_distance,
            inverse_masses,
        })
    }

    /// Create a distance constraint whose rest distance is measured
    /// from the particles' rest positions.
    ///
    /// # Errors
    ///
    /// Returns an error when an index is out of bounds or the
    /// stiffness is outside `[0, 1]`.
    pub fn from_rest_state(
        particles: &[Particle],
        i0: usize,
        i1: usize,
        stiffness: f64,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        let indices = [i0, i1];
        let inverse_masses = bake_inverse_masses(particles, &indices)?;
        let rest_distance = (particles[i0].rest_position - particles[i1].rest_position).norm();
        Ok(Self {
            indices,
            stiffness,
            rest_distance,
            inverse_masses,
        })
    }

    /// Compute `C = |x0 - x1| - d`.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        let x0 = &particles[self.indices[0]].predicted_position;
        let x1 = &particles[self.indices[1]].predicted_position;
        (x0 - x1).norm() - self.rest_distance
    }

    /// Compute the gradient: the unit vector from particle 1 toward
    /// particle 0, and its negation.
    ///
    /// When the particles coincide the direction is undefined; an
    /// arbitrary unit direction is substituted so the solver still
    /// separates them (the correction direction is then
    /// non-deterministic).
    #[must_use]
    pub fn gradient(&self, particles: &[Particle]) -> [Vector3<f64>; 2] {
        let x0 = &particles[self.indices[0]].predicted_position;
        let x1 = &particles[self.indices[1]].predicted_position;

        let diff = x0 - x1;
        let length = diff.norm();

        let n = if length < DEGENERACY_EPS {
            tracing::warn!(
                "Coincident particles {} and {} in distance constraint; \
                 falling back to a random correction direction",
                self.indices[0],
                self.indices[1]
            );
            random_unit_direction()
        } else {
            diff / length
        };

        [n, -n]
    }

    /// Project the two particles by one PBD step.
    pub fn project(&self, particles: &mut [Particle]) {
        let c = self.value(particles);
        let grad_c = self.gradient(particles);
        project_positions(
            c,
            &grad_c,
            &self.inverse_masses,
            self.stiffness,
            &self.indices,
            particles,
        );
    }
}

/// Attachment of a particle to a fixed target point.
///
/// Typically used with stiffness near 1 to emulate pins. Unlike the
/// distance constraint, the degenerate case (particle exactly at the
/// target) yields a zero gradient and the projection is a no-op; the
/// constraint is satisfied there.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedPointConstraint {
    /// Index of the constrained particle.
    pub indices: [usize; 1],
    /// Stiffness in `[0, 1]`.
    pub stiffness: f64,
    /// Target point the particle is pulled toward.
    pub target: Point3<f64>,
    inverse_masses: [f64; 1],
}

impl FixedPointConstraint {
    /// Create a fixed-point constraint.
    ///
    /// # Errors
    ///
    /// Returns an error when the index is out of bounds, the stiffness
    /// is outside `[0, 1]`, or the target is non-finite.
    pub fn new(
        particles: &[Particle],
        index: usize,
        stiffness: f64,
        target: Point3<f64>,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        if !target.coords.iter().all(|v| v.is_finite()) {
            return Err(PbdError::invalid_constraint("target point is not finite"));
        }
        let indices = [index];
        let inverse_masses = bake_inverse_masses(particles, &indices)?;
        Ok(Self {
            indices,
            stiffness,
            target,
            inverse_masses,
        })
    }

    /// Compute `C = |x - target|`.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        (particles[self.indices[0]].predicted_position - self.target).norm()
    }

    /// Compute the gradient: the unit vector from the target toward
    /// the particle, or zero when the particle sits on the target.
    #[must_use]
    pub fn gradient(&self, particles: &[Particle]) -> [Vector3<f64>; 1] {
        let diff = particles[self.indices[0]].predicted_position - self.target;
        let length = diff.norm();
        if length < DEGENERACY_EPS {
            return [Vector3::zeros()];
        }
        [diff / length]
    }

    /// Project the particle by one PBD step.
    pub fn project(&self, particles: &mut [Particle]) {
        let c = self.value(particles);
        let grad_c = self.gradient(particles);
        project_positions(
            c,
            &grad_c,
            &self.inverse_masses,
            self.stiffness,
            &self.indices,
            particles,
        );
    }
}

/// One-sided half-space collision constraint.
///
/// Keeps a particle on the non-negative side of the plane
/// `n · x - d = 0`. This is an inequality constraint: projection is
/// skipped entirely while the particle is on the allowed side, so it
/// must be re-evaluated every solver iteration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvironmentalCollisionConstraint {
    /// Index of the constrained particle.
    pub indices: [usize; 1],
    /// Stiffness in `[0, 1]`.
    pub stiffness: f64,
    /// Unit plane normal, pointing toward the allowed side.
    pub normal: Vector3<f64>,
    /// Plane offset along the normal.
    pub offset: f64,
    inverse_masses: [f64; 1],
}

impl EnvironmentalCollisionConstraint {
    /// Create a half-space constraint for the plane `normal · x = offset`.
    ///
    /// The normal is normalized here; it only needs to be non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error when the index is out of bounds, the stiffness
    /// is outside `[0, 1]`, or the normal is numerically zero or
    /// non-finite.
    pub fn new(
        particles: &[Particle],
        index: usize,
        stiffness: f64,
        normal: Vector3<f64>,
        offset: f64,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        let length = normal.norm();
        if !length.is_finite() || length < DEGENERACY_EPS {
            return Err(PbdError::invalid_constraint(
                "collision plane normal must be non-zero and finite",
            ));
        }
        if !offset.is_finite() {
            return Err(PbdError::invalid_constraint("plane offset is not finite"));
        }
        let indices = [index];
        let inverse_masses = bake_inverse_masses(particles, &indices)?;
        Ok(Self {
            indices,
            stiffness,
            normal: normal / length,
            offset,
            inverse_masses,
        })
    }

    /// Compute the signed distance `C = n · x - d`.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        let x = &particles[self.indices[0]].predicted_position;
        self.normal.dot(&x.coords) - self.offset
    }

    /// Compute the gradient: the constant plane normal.
    #[must_use]
    pub fn gradient(&self, _particles: &[Particle]) -> [Vector3<f64>; 1] {
        [self.normal]
    }

    /// Project the particle back to the plane surface, if penetrating.
    ///
    /// Strict no-op whenever `C >= 0`.
    pub fn project(&self, particles: &mut [Particle]) {
        let c = self.value(particles);
        if c >= 0.0 {
            return;
        }
        let grad_c = self.gradient(particles);
        project_positions(
            c,
            &grad_c,
            &self.inverse_masses,
            self.stiffness,
            &self.indices,
            particles,
        );
    }
}

/// Dihedral-angle bending constraint over two triangles sharing an edge.
///
/// The four particles are ordered `(p0, p1, p2, p3)` where `(p0, p1)`
/// is the shared edge and `p2`, `p3` are the opposite apex points of
/// the triangles `(p0, p1, p2)` and `(p0, p1, p3)`. The constraint is
/// the deviation of the angle between the two triangle normals from
/// its rest value.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BendingConstraint {
    /// Indices of the four particles: shared edge first, then the two
    /// apex points.
    pub indices: [usize; 4],
    /// Stiffness in `[0, 1]`.
    pub stiffness: f64,
    /// Rest dihedral angle in `[0, pi]`, baked at construction.
    pub rest_angle: f64,
    inverse_masses: [f64; 4],
}

impl BendingConstraint {
    /// Create a bending constraint with an explicit rest angle.
    ///
    /// # Errors
    ///
    /// Returns an error when an index is out of bounds, the stiffness
    /// is outside `[0, 1]`, or the rest angle is outside `[0, pi]`.
    pub fn new(
        particles: &[Particle],
        indices: [usize; 4],
        stiffness: f64,
        rest_angle: f64,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        if !rest_angle.is_finite() || !(0.0..=std::f64::consts::PI).contains(&rest_angle) {
            return Err(PbdError::invalid_constraint(format!(
                "rest angle {rest_angle} outside [0, pi]"
            )));
        }
        let inverse_masses = bake_inverse_masses(particles, &indices)?;
        Ok(Self {
            indices,
            stiffness,
            rest_angle,
            inverse_masses,
        })
    }

    /// Create a bending constraint whose rest angle is measured from
    /// the particles' rest positions.
    ///
    /// # Errors
    ///
    /// Returns an error when an index is out of bounds, the stiffness
    /// is outside `[0, 1]`, or either rest triangle is degenerate.
    pub fn from_rest_state(
        particles: &[Particle],
        indices: [usize; 4],
        stiffness: f64,
    ) -> Result<Self> {
        validate_stiffness(stiffness)?;
        let inverse_masses = bake_inverse_masses(particles, &indices)?;

        let x0 = &particles[indices[0]].rest_position;
        let x1 = &particles[indices[1]].rest_position;
        let x2 = &particles[indices[2]].rest_position;
        let x3 = &particles[indices[3]].rest_position;

        let n0 = triangle_normal(x0, x1, x2)
            .ok_or_else(|| PbdError::invalid_constraint("degenerate rest triangle (p0, p1, p2)"))?;
        let n1 = triangle_normal(x0, x1, x3)
            .ok_or_else(|| PbdError::invalid_constraint("degenerate rest triangle (p0, p1, p3)"))?;

        let rest_angle = n0.dot(&n1).clamp(-1.0, 1.0).acos();
        Ok(Self {
            indices,
            stiffness,
            rest_angle,
            inverse_masses,
        })
    }

    /// Compute `C = acos(n0 · n1) - rest_angle` with the dot product
    /// clamped to `[-1, 1]`.
    ///
    /// Degenerate triangles (undefined normals) report 0: no violation
    /// can be measured there and the gradient is zero anyway.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        let x0 = &particles[self.indices[0]].predicted_position;
        let x1 = &particles[self.indices[1]].predicted_position;
        let x2 = &particles[self.indices[2]].predicted_position;
        let x3 = &particles[self.indices[3]].predicted_position;

        let (Some(n0), Some(n1)) = (triangle_normal(x0, x1, x2), triangle_normal(x0, x1, x3))
        else {
            return 0.0;
        };

        let current_angle = n0.dot(&n1).clamp(-1.0, 1.0).acos();
        current_angle - self.rest_angle
    }

    /// Compute the analytic gradient of the dihedral angle.
    ///
    /// The chain rule runs through the two normalized cross products
    /// `n0 = normalize(p1 × p2)` and `n1 = normalize(p1 × p3)` (edge
    /// vectors taken relative to particle 0). Particle 0's component
    /// is the negative sum of the other three: a rigid translation of
    /// all four particles leaves the angle unchanged, so the gradient
    /// components must sum to zero.
    ///
    /// Returns all zeros when a triangle is degenerate or the normals
    /// are within `1e-12` of (anti-)parallel, where the `acos`
    /// derivative blows up.
    #[must_use]
    pub fn gradient(&self, particles: &[Particle]) -> [Vector3<f64>; 4] {
        let x0 = &particles[self.indices[0]].predicted_position;
        let x1 = &particles[self.indices[1]].predicted_position;
        let x2 = &particles[self.indices[2]].predicted_position;
        let x3 = &particles[self.indices[3]].predicted_position;

        // Treating p0 as the origin without loss of generality.
        let p1 = x1 - x0;
        let p2 = x2 - x0;
        let p3 = x3 - x0;

        let zeros = [Vector3::zeros(); 4];

        let cross_02 = p1.cross(&p2);
        let cross_03 = p1.cross(&p3);
        let len_02 = cross_02.norm();
        let len_03 = cross_03.norm();
        if len_02 < DEGENERACY_EPS || len_03 < DEGENERACY_EPS {
            return zeros;
        }

        let n0 = cross_02 / len_02;
        let n1 = cross_03 / len_03;

        let d = n0.dot(&n1);
        if 1.0 - d.abs() < DEGENERACY_EPS {
            return zeros;
        }

        // d(acos(d))/dd
        let common = -1.0 / (1.0 - d * d).sqrt();

        let (Some((jac_n0_p1, jac_n0_p2)), Some((jac_n1_p1, jac_n1_p3))) = (
            normalized_cross_jacobians(&p1, &p2),
            normalized_cross_jacobians(&p1, &p3),
        ) else {
            return zeros;
        };

        let grad_1 = (jac_n0_p1.transpose() * n1 + jac_n1_p1.transpose() * n0) * common;
        let grad_2 = (jac_n0_p2.transpose() * n1) * common;
        let grad_3 = (jac_n1_p3.transpose() * n0) * common;
        let grad_0 = -grad_1 - grad_2 - grad_3;

        [grad_0, grad_1, grad_2, grad_3]
    }

    /// Project the four particles by one PBD step.
    pub fn project(&self, particles: &mut [Particle]) {
        let c = self.value(particles);
        let grad_c = self.gradient(particles);
        project_positions(
            c,
            &grad_c,
            &self.inverse_masses,
            self.stiffness,
            &self.indices,
            particles,
        );
    }
}

/// Quadratic isometric bending constraint over four particles.
///
/// Equivalent in effect to [`BendingConstraint`] but formulated as the
/// quadratic energy `C = 1/2 x^T Q x` with a weight matrix `Q`
/// precomputed from rest-state cotangents and triangle areas. All
/// trigonometry is amortized into `Q` once; each iteration costs one
/// small matrix-vector product.
///
/// Particle order matches [`BendingConstraint`]: shared edge `(p0, p1)`
/// first, then the two apex points.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IsometricBendingConstraint {
    /// Indices of the four particles.
    pub indices: [usize; 4],
    /// Stiffness in `[0, 1]`.
    pub stiffness: f64,
    weights: Matrix4<f64>,
    inverse_masses: [f64; 4],
}

impl IsometricBendingConstraint {
    /// Create an isometric bending constraint from the particles' rest
    /// positions.
    ///
    /// Builds the cotangent weight vector `K` over the four edges
    /// flanking the shared edge and sets
    /// `Q = (3 / (A0 + A1)) * K * K^T`, where `A0` and `A1` are the
    /// rest areas of the two triangles.
    ///
    /// # Errors
    ///
    /// Returns an error when an index is out of bounds, the stiffness
    /// is outside `[0, 1]`, the rest triangles have numerically zero
    /// area, or a cotangent diverges (collinear rest edges).
    pub fn new(particles: &[Particle], indices: [usize; 4], stiffness: f64) -> Result<Self> {
        validate_stiffness(stiffness)?;
        let inverse_masses = bake_inverse_masses(particles, &indices)?;

        let x0 = &particles[indices[0]].rest_position;
        let x1 = &particles[indices[1]].rest_position;
        let x2 = &particles[indices[2]].rest_position;
        let x3 = &particles[indices[3]].rest_position;

        let e0 = x1 - x0;
        let e1 = x2 - x1;
        let e2 = x0 - x2;
        let e3 = x3 - x0;
        let e4 = x1 - x3;

        let cot_01 = cot_theta(&e0, &-e1);
        let cot_02 = cot_theta(&e0, &-e2);
        let cot_03 = cot_theta(&e0, &e3);
        let cot_04 = cot_theta(&e0, &e4);

        let k = Vector4::new(
            cot_01 + cot_04,
            cot_02 + cot_03,
            -cot_01 - cot_02,
            -cot_03 - cot_04,
        );

        let area_0 = 0.5 * e0.cross(&e1).norm();
        let area_1 = 0.5 * e0.cross(&e3).norm();
        if area_0 + area_1 < DEGENERACY_EPS {
            return Err(PbdError::invalid_constraint(
                "isometric bending rest triangles have zero area",
            ));
        }

        let weights = k * k.transpose() * (3.0 / (area_0 + area_1));
        if !weights.iter().all(|v| v.is_finite()) {
            return Err(PbdError::numerical_error(
                "isometric bending weight matrix is not finite",
            ));
        }

        Ok(Self {
            indices,
            stiffness,
            weights,
            inverse_masses,
        })
    }

    /// The precomputed symmetric 4x4 weight matrix `Q`.
    #[must_use]
    pub const fn weights(&self) -> &Matrix4<f64> {
        &self.weights
    }

    /// Compute `C = 1/2 * sum_ij Q(i, j) * (x_i . x_j)`.
    #[must_use]
    pub fn value(&self, particles: &[Particle]) -> f64 {
        let mut sum = 0.0;
        for i in 0..4 {
            let x_i = &particles[self.indices[i]].predicted_position.coords;
            for j in 0..4 {
                let x_j = &particles[self.indices[j]].predicted_position.coords;
                sum += self.weights[(i, j)] * x_i.dot(x_j);
            }
        }
        0.5 * sum
    }

    /// Compute the gradient, linear in the current positions:
    /// `grad_i = sum_j Q(i, j) * x_j`.
    #[must_use]
    pub fn gradient(&self, particles: &[Particle]) -> [Vector3<f64>; 4] {
        let mut grad_c = [Vector3::zeros(); 4];
        for (i, grad) in grad_c.iter_mut().enumerate() {
            for j in 0..4 {
                *grad +=
                    particles[self.indices[j]].predicted_position.coords * self.weights[(i, j)];
            }
        }
        grad_c
    }

    /// Project the four particles by one PBD step.
    pub fn project(&self, particles: &mut [Particle]) {
        let c = self.value(particles);
        let grad_c = self.gradient(particles);
        project_positions(
            c,
            &grad_c,
            &self.inverse_masses,
            self.stiffness,
            &self.indices,
            particles,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_masses(positions: &[Point3<f64>]) -> Vec<Particle> {
        positions.iter().map(|&p| Particle::new(p, 1.0)).collect()
    }

    #[test]
    fn test_distance_projects_to_rest_length() {
        // Separated by d + 0.5 with equal masses and stiffness 1:
        // one projection restores d exactly, each particle moving 0.25.
        let mut particles =
            unit_masses(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.5, 0.0, 0.0)]);
        let constraint = DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap();

        constraint.project(&mut particles);

        assert_relative_eq!(constraint.value(&particles), 0.0, epsilon = 1e-12);
        assert_relative_eq!(particles[0].predicted_position.x, 0.25, epsilon = 1e-12);
        assert_relative_eq!(particles[1].predicted_position.x, 1.25, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_pinned_absorbs_nothing() {
        let mut particles = vec![
            Particle::pinned(Point3::new(0.0, 0.0, 0.0)),
            Particle::new(Point3::new(2.0, 0.0, 0.0), 1.0),
        ];
        let constraint = DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap();

        constraint.project(&mut particles);

        assert_eq!(particles[0].predicted_position, Point3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(particles[1].predicted_position.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_coincident_separates() {
        // Undefined direction: a random unit fallback still separates
        // the pair to the rest distance.
        let mut particles =
            unit_masses(&[Point3::new(0.5, 0.5, 0.5), Point3::new(0.5, 0.5, 0.5)]);
        let constraint = DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap();

        constraint.project(&mut particles);

        let separation =
            (particles[0].predicted_position - particles[1].predicted_position).norm();
        assert!(separation.is_finite());
        assert_relative_eq!(separation, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_satisfied_is_noop() {
        let mut particles =
            unit_masses(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)]);
        let constraint = DistanceConstraint::from_rest_state(&particles, 0, 1, 1.0).unwrap();
        let before: Vec<_> = particles.iter().map(|p| p.predicted_position).collect();

        constraint.project(&mut particles);

        for (particle, before) in particles.iter().zip(&before) {
            assert_eq!(particle.predicted_position, *before);
        }
    }

    #[test]
    fn test_distance_rejects_invalid_parameters() {
        let particles = unit_masses(&[Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);

        assert!(matches!(
            DistanceConstraint::new(&particles, 0, 1, 1.0, -1.0),
            Err(PbdError::InvalidConstraint(_))
        ));
        assert!(matches!(
            DistanceConstraint::new(&particles, 0, 1, 1.5, 1.0),
            Err(PbdError::InvalidConstraint(_))
        ));
        assert!(matches!(
            DistanceConstraint::new(&particles, 0, 7, 1.0, 1.0),
            Err(PbdError::IndexOutOfBounds(_))
        ));
    }

    #[test]
    fn test_fixed_point_pulls_to_target() {
        let mut particles = unit_masses(&[Point3::new(1.0, 2.0, 2.0)]);
        let constraint = FixedPointConstraint::new(&particles, 0, 1.0, Point3::origin()).unwrap();

        constraint.project(&mut particles);

        assert_relative_eq!(
            particles[0].predicted_position.coords,
            Vector3::zeros(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fixed_point_at_target_is_noop() {
        // Zero-gradient policy: unlike the distance constraint, no
        // random fallback.
        let target = Point3::new(0.3, -0.2, 0.9);
        let mut particles = unit_masses(&[target]);
        let constraint = FixedPointConstraint::new(&particles, 0, 1.0, target).unwrap();

        assert_eq!(constraint.gradient(&particles), [Vector3::zeros()]);

        constraint.project(&mut particles);
        assert_eq!(particles[0].predicted_position, target);
    }

    #[test]
    fn test_collision_noop_on_allowed_side() {
        let mut particles = unit_masses(&[Point3::new(0.2, -0.4, 0.7)]);
        let constraint =
            EnvironmentalCollisionConstraint::new(&particles, 0, 1.0, Vector3::z(), 0.0).unwrap();
        let before = particles[0].predicted_position;

        constraint.project(&mut particles);

        // Bit-identical: the inequality constraint is inactive.
        assert_eq!(particles[0].predicted_position, before);
    }

    #[test]
    fn test_collision_projects_onto_plane() {
        let mut particles = unit_masses(&[Point3::new(0.2, -0.4, -0.3)]);
        let constraint =
            EnvironmentalCollisionConstraint::new(&particles, 0, 1.0, Vector3::z(), 0.0).unwrap();

        assert_relative_eq!(constraint.value(&particles), -0.3, epsilon = 1e-12);

        constraint.project(&mut particles);

        assert_relative_eq!(constraint.value(&particles), 0.0, epsilon = 1e-12);
        // Pushed straight back along the normal.
        assert_relative_eq!(particles[0].predicted_position.x, 0.2, epsilon = 1e-12);
        assert_relative_eq!(particles[0].predicted_position.y, -0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_collision_normal_is_normalized() {
        let particles = unit_masses(&[Point3::new(0.0, 0.0, 3.0)]);
        let constraint =
            EnvironmentalCollisionConstraint::new(&particles, 0, 1.0, Vector3::z() * 10.0, 1.0)
                .unwrap();

        assert_relative_eq!(constraint.normal.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(constraint.value(&particles), 2.0, epsilon = 1e-12);
    }

    /// Two triangles folded to a 90 degree dihedral angle.
    fn folded_quad() -> Vec<Particle> {
        unit_masses(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.8, 0.0),
            Point3::new(0.5, 0.0, 0.8),
        ])
    }

    #[test]
    fn test_bending_value_zero_at_rest() {
        let particles = folded_quad();
        let constraint = BendingConstraint::from_rest_state(&particles, [0, 1, 2, 3], 1.0).unwrap();

        assert_relative_eq!(constraint.value(&particles), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bending_gradient_matches_finite_differences() {
        let mut particles = folded_quad();
        let constraint = BendingConstraint::new(&particles, [0, 1, 2, 3], 1.0, 0.5).unwrap();

        let analytic = constraint.gradient(&particles);
        let h = 1e-6;

        for i in 0..4 {
            for k in 0..3 {
                let original = particles[i].predicted_position[k];

                particles[i].predicted_position[k] = original + h;
                let plus = constraint.value(&particles);
                particles[i].predicted_position[k] = original - h;
                let minus = constraint.value(&particles);
                particles[i].predicted_position[k] = original;

                let fd = (plus - minus) / (2.0 * h);
                assert_relative_eq!(analytic[i][k], fd, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_bending_gradient_sums_to_zero() {
        let particles = folded_quad();
        let constraint = BendingConstraint::new(&particles, [0, 1, 2, 3], 1.0, 0.5).unwrap();

        let grad = constraint.gradient(&particles);
        let sum: Vector3<f64> = grad.iter().sum();
        assert_relative_eq!(sum, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_bending_coincident_apexes_zero_gradient() {
        // Coplanar normals (n0 == n1): the acos derivative is
        // singular, so the gradient must degrade to zeros, never
        // NaN/Inf.
        let apex = Point3::new(0.5, 0.8, 0.0);
        let particles = unit_masses(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            apex,
            apex,
        ]);
        let constraint = BendingConstraint::new(&particles, [0, 1, 2, 3], 1.0, 0.5).unwrap();

        let grad = constraint.gradient(&particles);
        for component in &grad {
            assert!(component.iter().all(|v| v.is_finite()));
            assert_eq!(*component, Vector3::zeros());
        }
    }

    #[test]
    fn test_bending_projection_reduces_violation() {
        let mut particles = folded_quad();
        let constraint = BendingConstraint::from_rest_state(&particles, [0, 1, 2, 3], 1.0).unwrap();

        // Fold the second triangle further out of its rest plane.
        particles[3].predicted_position = Point3::new(0.5, -0.4, 0.7);
        let before = constraint.value(&particles).abs();
        assert!(before > 1e-3);

        constraint.project(&mut particles);

        assert!(constraint.value(&particles).abs() < before);
    }

    /// Planar quad: two triangles sharing the edge (0, 1).
    fn planar_quad() -> Vec<Particle> {
        unit_masses(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.5, -0.8, 0.0),
        ])
    }

    #[test]
    fn test_isometric_bending_weights_symmetric() {
        let particles = planar_quad();
        let constraint = IsometricBendingConstraint::new(&particles, [0, 1, 2, 3], 1.0).unwrap();

        let q = constraint.weights();
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(q[(i, j)], q[(j, i)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_isometric_bending_flat_rest_has_zero_energy() {
        // The cotangent weights annihilate the planar rest
        // configuration, so the energy and its gradient vanish there.
        let particles = planar_quad();
        let constraint = IsometricBendingConstraint::new(&particles, [0, 1, 2, 3], 1.0).unwrap();

        assert_relative_eq!(constraint.value(&particles), 0.0, epsilon = 1e-9);
        for grad in &constraint.gradient(&particles) {
            assert_relative_eq!(*grad, Vector3::zeros(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_isometric_bending_resists_folding() {
        let mut particles = planar_quad();
        let constraint = IsometricBendingConstraint::new(&particles, [0, 1, 2, 3], 1.0).unwrap();

        // Lift one apex out of the rest plane.
        particles[3].predicted_position = Point3::new(0.5, -0.6, 0.5);
        let before = constraint.value(&particles);
        assert!(before > 1e-6);

        constraint.project(&mut particles);

        assert!(constraint.value(&particles).abs() < before);
    }

    #[test]
    fn test_isometric_bending_pinned_edge() {
        let mut particles = planar_quad();
        particles[0].inverse_mass = 0.0;
        particles[1].inverse_mass = 0.0;
        let constraint = IsometricBendingConstraint::new(&particles, [0, 1, 2, 3], 1.0).unwrap();

        particles[2].predicted_position = Point3::new(0.0, 0.8, 0.6);
        let edge_0 = particles[0].predicted_position;
        let edge_1 = particles[1].predicted_position;

        constraint.project(&mut particles);

        assert_eq!(particles[0].predicted_position, edge_0);
        assert_eq!(particles[1].predicted_position, edge_1);
    }

    #[test]
    fn test_constraint_enum_dispatch() {
        let mut particles =
            unit_masses(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.5, 0.0, 0.0)]);
        let constraint =
            Constraint::Distance(DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap());

        assert_eq!(constraint.constraint_type(), ConstraintType::Distance);
        assert_eq!(constraint.vertices().as_slice(), &[0, 1]);
        assert_eq!(constraint.arity(), 2);
        assert_relative_eq!(constraint.stiffness(), 1.0);
        assert_relative_eq!(constraint.value(&particles), 0.5, epsilon = 1e-12);
        assert_eq!(constraint.gradient(&particles).len(), 2);

        constraint.project(&mut particles);
        assert_relative_eq!(constraint.value(&particles), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stiffness_under_relaxes() {
        let mut particles =
            unit_masses(&[Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)]);
        let constraint = DistanceConstraint::new(&particles, 0, 1, 0.5, 1.0).unwrap();

        constraint.project(&mut particles);

        // Half of the ideal correction: violation shrinks from 1.0 to 0.5.
        assert_relative_eq!(constraint.value(&particles), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_baked_inverse_masses_ignore_later_changes() {
        // The mass vector is captured at construction; pinning a
        // particle afterwards does not change how this constraint
        // distributes its correction.
        let mut particles =
            unit_masses(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.5, 0.0, 0.0)]);
        let constraint = DistanceConstraint::new(&particles, 0, 1, 1.0, 1.0).unwrap();

        particles[0].inverse_mass = 0.0;
        constraint.project(&mut particles);

        assert_relative_eq!(particles[0].predicted_position.x, 0.25, epsilon = 1e-12);
        assert_relative_eq!(particles[1].predicted_position.x, 1.25, epsilon = 1e-12);
    }
}
