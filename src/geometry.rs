//! Geometric primitives and predicates used by the mesh and the differential operators.

use crate::error::GeometryError;
use crate::Real;
use na::{Point3, Vector3};
use parry::shape::{Tetrahedron, Triangle};

/// Relative tolerance of the orientation predicate.
pub const ORIENTATION_EPSILON: Real = 1.0e-12;
/// Relative tolerance of the in-sphere predicate.
pub const IN_SPHERE_EPSILON: Real = 1.0e-12;
/// Relative volume below which a tetrahedron is treated as flat.
pub const DEGENERATE_VOLUME_EPSILON: Real = 1.0e-14;

/// Orientation of four points.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// `d` lies on the negative side of the plane `(a, b, c)`.
    Negative,
    /// The four points are coplanar up to the tolerance.
    Degenerate,
    /// `d` lies on the positive side of the plane `(a, b, c)`.
    Positive,
}

/// Position of a point relative to a circumsphere.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InSphere {
    /// Strictly outside.
    Outside,
    /// On the sphere, up to the tolerance.
    Boundary,
    /// Strictly inside.
    Inside,
}

/// Sign of the triple product `(b - a) · ((c - a) × (d - a))`.
///
/// The tolerance is relative to the product of the three edge lengths so the predicate is
/// scale-invariant.
pub fn orientation(
    a: &Point3<Real>,
    b: &Point3<Real>,
    c: &Point3<Real>,
    d: &Point3<Real>,
) -> Orientation {
    let u = b - a;
    let v = c - a;
    let w = d - a;
    let det = u.dot(&v.cross(&w));
    let scale = u.norm() * v.norm() * w.norm();

    if det > ORIENTATION_EPSILON * scale {
        Orientation::Positive
    } else if det < -ORIENTATION_EPSILON * scale {
        Orientation::Negative
    } else {
        Orientation::Degenerate
    }
}

/// Position of `p` relative to the sphere of the given center and squared radius.
pub fn in_sphere(center: &Point3<Real>, squared_radius: Real, p: &Point3<Real>) -> InSphere {
    let diff = squared_radius - na::distance_squared(center, p);

    if diff > IN_SPHERE_EPSILON * squared_radius {
        InSphere::Inside
    } else if diff < -IN_SPHERE_EPSILON * squared_radius {
        InSphere::Outside
    } else {
        InSphere::Boundary
    }
}

/// The point equidistant from the four vertices of a tetrahedron.
///
/// Returns `None` if the tetrahedron is flat.
pub fn tetrahedron_circumcenter(
    a: &Point3<Real>,
    b: &Point3<Real>,
    c: &Point3<Real>,
    d: &Point3<Real>,
) -> Option<Point3<Real>> {
    let u = b - a;
    let v = c - a;
    let w = d - a;
    let denom = 2.0 * u.dot(&v.cross(&w));

    if denom.abs() <= ORIENTATION_EPSILON * u.norm() * v.norm() * w.norm() {
        return None;
    }

    let offset = (v.cross(&w) * u.norm_squared()
        + w.cross(&u) * v.norm_squared()
        + u.cross(&v) * w.norm_squared())
        / denom;
    Some(a + offset)
}

/// The center of the circle through the three vertices of a triangle.
///
/// Returns `None` if the triangle is flat.
pub fn triangle_circumcenter(
    a: &Point3<Real>,
    b: &Point3<Real>,
    c: &Point3<Real>,
) -> Option<Point3<Real>> {
    let u = b - a;
    let v = c - a;
    let n = u.cross(&v);
    let denom = 2.0 * n.norm_squared();

    if denom == 0.0 {
        return None;
    }

    let offset = (v.cross(&n) * u.norm_squared() + n.cross(&u) * v.norm_squared()) / denom;
    Some(a + offset)
}

/// Unsigned area of a triangle.
pub fn triangle_area(a: &Point3<Real>, b: &Point3<Real>, c: &Point3<Real>) -> Real {
    Triangle::new(*a, *b, *c).area()
}

/// Cross product of the two edges of `(a, b, c)` starting at `a`.
///
/// Its norm is twice the triangle area.
pub fn scaled_normal(a: &Point3<Real>, b: &Point3<Real>, c: &Point3<Real>) -> Vector3<Real> {
    (b - a).cross(&(c - a))
}

/// The tetrahedron shape with the given vertices.
pub fn tetrahedron(points: &[Point3<Real>; 4]) -> Tetrahedron {
    Tetrahedron::new(points[0], points[1], points[2], points[3])
}

/// Arithmetic mean of the given points.
pub fn centroid(points: &[Point3<Real>]) -> Point3<Real> {
    parry::utils::center(points)
}

/// Does the tetrahedron contain `p`, boundary included?
pub fn tetrahedron_contains(points: &[Point3<Real>; 4], p: &Point3<Real>) -> bool {
    let reference = orientation(&points[0], &points[1], &points[2], &points[3]);

    if reference == Orientation::Degenerate {
        return false;
    }

    (0..4).all(|i| {
        let mut sub = *points;
        sub[i] = *p;
        let o = orientation(&sub[0], &sub[1], &sub[2], &sub[3]);
        o == reference || o == Orientation::Degenerate
    })
}

/// Volumetric barycentric coordinates of `p` with respect to a tetrahedron.
///
/// Each coordinate is the ratio between the volume of the sub-tetrahedron where the
/// corresponding vertex is replaced by `p` and the volume of the whole tetrahedron. Absolute
/// values are used so any vertex ordering is accepted, which means the coordinates of a point
/// outside of the tetrahedron are not signed.
pub fn barycentric_coordinates(
    p: &Point3<Real>,
    points: &[Point3<Real>; 4],
) -> Result<[Real; 4], GeometryError> {
    let [pa, pb, pc, pd] = *points;
    let volume = tetrahedron(points).signed_volume();
    let longest_edge = [pb - pa, pc - pa, pd - pa, pc - pb, pd - pb, pd - pc]
        .iter()
        .map(|e| e.norm())
        .fold(0.0, Real::max);

    if volume.abs() <= DEGENERATE_VOLUME_EPSILON * longest_edge.powi(3) || volume == 0.0 {
        return Err(GeometryError::DegenerateTetrahedron { volume });
    }

    let sub_volume = |a, b, c, d| Tetrahedron::new(a, b, c, d).signed_volume();
    Ok([
        (sub_volume(pb, pc, pd, *p) / volume).abs(),
        (sub_volume(pa, pc, pd, *p) / volume).abs(),
        (sub_volume(pb, pa, pd, *p) / volume).abs(),
        (sub_volume(pb, pc, pa, *p) / volume).abs(),
    ])
}

/// Solid angle, in steradians, subtended by the triangle `(a, b, c)` seen from `x`.
///
/// Uses the Van Oosterom and Strackee formula.
pub fn solid_angle(
    x: &Point3<Real>,
    a: &Point3<Real>,
    b: &Point3<Real>,
    c: &Point3<Real>,
) -> Real {
    let p = a - x;
    let q = b - x;
    let r = c - x;
    let (pn, qn, rn) = (p.norm(), q.norm(), r.norm());
    let numerator = p.dot(&q.cross(&r)).abs();
    let denominator = pn * qn * rn + p.dot(&q) * rn + q.dot(&r) * pn + r.dot(&p) * qn;
    2.0 * numerator.atan2(denominator)
}
