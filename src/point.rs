//! Physical points and the tolerance used to decide whether two points coincide.
use nalgebra::Point3;

/// A point in physical space.
///
/// Dirac points are always stored in three dimensions. Two-dimensional meshes embed
/// their geometry in the `z = 0` plane.
pub type PhysicalPoint = Point3<f64>;

/// Absolute distance below which two points are considered to be the same location.
pub const POINT_TOLERANCE: f64 = 1e-6;

/// Returns `true` if `a` and `b` lie within `tolerance` of each other.
///
/// The comparison is made on squared distances, so `tolerance` is squared once rather
/// than taking a square root of the distance.
///
/// Note that this relation is **not transitive**: given three points `a`, `b`, `c` on a line
/// with spacing slightly below `tolerance`, `a ~ b` and `b ~ c` hold while `a ~ c` does not.
/// Which entry a new point merges into therefore depends on registration order, and the
/// registry always merges into the *first* matching entry.
#[inline]
pub fn same_location_with_tolerance(a: &PhysicalPoint, b: &PhysicalPoint, tolerance: f64) -> bool {
    (a - b).norm_squared() < tolerance * tolerance
}

/// Returns `true` if `a` and `b` are the same location with respect to [`POINT_TOLERANCE`].
#[inline]
pub fn same_location(a: &PhysicalPoint, b: &PhysicalPoint) -> bool {
    same_location_with_tolerance(a, b, POINT_TOLERANCE)
}

/// Builds points from a flat list of coordinates `[x0, y0, z0, x1, y1, z1, ...]`.
///
/// Coordinates are grouped by `dim` (1, 2 or 3); missing trailing coordinates are zero.
/// Returns `None` if `dim` is not in `1..=3` or the list length is not a multiple of `dim`.
pub fn points_from_flat_coordinates(coordinates: &[f64], dim: usize) -> Option<Vec<PhysicalPoint>> {
    if !(1..=3).contains(&dim) || coordinates.len() % dim != 0 {
        return None;
    }
    let points = coordinates
        .chunks_exact(dim)
        .map(|chunk| {
            let mut p = PhysicalPoint::origin();
            p.coords.as_mut_slice()[..dim].copy_from_slice(chunk);
            p
        })
        .collect();
    Some(points)
}
