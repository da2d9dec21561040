use crate::point::{PhysicalPoint, POINT_TOLERANCE};
use ::proptest::prelude::*;
use nalgebra::{Point2, Point3, Vector3};

pub fn point2() -> impl Strategy<Value = Point2<f64>> {
    // Keep coordinates in a moderate range, so that tolerances stay meaningful
    let range = -10.0..10.0;
    [range.clone(), range.clone()].prop_map(|[x, y]| Point2::new(x, y))
}

pub fn point3() -> impl Strategy<Value = Point3<f64>> {
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range.clone()].prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// Points in the plane `z = 0` inside the box `[min, max]^2`.
pub fn planar_point_in(min: f64, max: f64) -> impl Strategy<Value = PhysicalPoint> {
    [min..max, min..max].prop_map(|[x, y]| Point3::new(x, y, 0.0))
}

/// Points at the same location as `point`, that is, closer than [`POINT_TOLERANCE`].
pub fn point_near(point: PhysicalPoint) -> impl Strategy<Value = PhysicalPoint> {
    // Stay well inside the tolerance ball
    let offset = 0.25 * POINT_TOLERANCE;
    [-offset..offset, -offset..offset, -offset..offset]
        .prop_map(move |[dx, dy, dz]| point + Vector3::new(dx, dy, dz))
}

/// Lists of planar points in `[min, max]^2`, where some points are repeated.
pub fn planar_points_with_duplicates(
    min: f64,
    max: f64,
    max_len: usize,
) -> impl Strategy<Value = Vec<PhysicalPoint>> {
    prop::collection::vec(planar_point_in(min, max), 1..=max_len)
        .prop_flat_map(|points| {
            let n = points.len();
            (Just(points), prop::collection::vec(0..n, 0..=n))
        })
        .prop_map(|(mut points, repeated)| {
            let duplicates: Vec<_> = repeated.iter().map(|&index| points[index]).collect();
            points.extend(duplicates);
            points
        })
}
