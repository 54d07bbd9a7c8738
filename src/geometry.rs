//! Small differential-geometry helpers shared by the constraints.
//!
//! Everything here is a pure function over nalgebra types. Degenerate
//! inputs (zero-length cross products) are reported as `None`; callers
//! translate that into their own no-op policy.

use nalgebra::{Matrix3, Point3, Vector3};

/// Below this, a squared or plain norm is treated as numerically zero.
pub(crate) const DEGENERACY_EPS: f64 = 1e-12;

/// Cotangent of the angle between `x` and `y`.
///
/// Computed as `x·y / |x×y|`. Unbounded for (anti-)parallel inputs;
/// callers working with valid triangle fans never hit that case.
#[must_use]
pub fn cot_theta(x: &Vector3<f64>, y: &Vector3<f64>) -> f64 {
    let cos_theta = x.dot(y);
    let sin_theta = x.cross(y).norm();
    cos_theta / sin_theta
}

/// Unit normal of the triangle `(p0, p1, p2)`.
///
/// Returns `None` when the triangle is degenerate (collinear or
/// coincident vertices).
#[must_use]
pub fn triangle_normal(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
) -> Option<Vector3<f64>> {
    let n = (p1 - p0).cross(&(p2 - p0));
    let len = n.norm();
    if len < DEGENERACY_EPS {
        return None;
    }
    Some(n / len)
}

/// Jacobians of `n = normalize(a × b)` with respect to `a` and `b`.
///
/// Built from the skew-symmetric cross operator and the tangent
/// projector `I − n nᵀ`:
///
/// ```text
/// ∂n/∂a = −(I − n nᵀ) [b]× / |a × b|
/// ∂n/∂b = +(I − n nᵀ) [a]× / |a × b|
/// ```
///
/// Returns `None` when `a × b` is numerically zero, i.e. the normal
/// direction is undefined.
#[must_use]
pub fn normalized_cross_jacobians(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
    let u = a.cross(b);
    let len = u.norm();
    if len < DEGENERACY_EPS {
        return None;
    }
    let n = u / len;
    let projector = Matrix3::identity() - n * n.transpose();
    let wrt_a = -(projector * b.cross_matrix()) / len;
    let wrt_b = (projector * a.cross_matrix()) / len;
    Some((wrt_a, wrt_b))
}
