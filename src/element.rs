//! Bilinear quadrilateral elements.
use itertools::Itertools;
use nalgebra::{distance, Matrix1x4, Matrix2, Matrix2x4, Point2, Vector2};

/// Reference coordinates of a point inside an element.
///
/// For two-dimensional elements the last component is zero.
pub type ReferencePoint = nalgebra::Point3<f64>;

/// Tolerance (in reference coordinates) used when deciding whether a point lies inside the
/// reference domain. Points on shared faces must be found by every element sharing the face.
pub const REFERENCE_CONTAINMENT_TOLERANCE: f64 = 1e-10;

const INVERSE_MAP_MAX_ITERATIONS: usize = 20;

/// A four-node quadrilateral element with bilinear basis functions.
///
/// Nodes are ordered counter-clockwise, with reference coordinates
/// `(-1, -1), (1, -1), (1, 1), (-1, 1)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quad4Element {
    vertices: [Point2<f64>; 4],
}

impl Quad4Element {
    pub fn from_vertices(vertices: [Point2<f64>; 4]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices([
            Point2::new(-1.0, -1.0),
            Point2::new(1.0, -1.0),
            Point2::new(1.0, 1.0),
            Point2::new(-1.0, 1.0),
        ])
    }

    pub fn vertices(&self) -> &[Point2<f64>; 4] {
        &self.vertices
    }

    #[rustfmt::skip]
    pub fn evaluate_basis(&self, xi: &Point2<f64>) -> Matrix1x4<f64> {
        // N_{alpha, beta}([alpha, beta]) = 1 with alpha, beta = 1 or -1
        let phi = |alpha: f64, beta: f64| (1.0 + alpha * xi[0]) * (1.0 + beta * xi[1]) / 4.0;
        Matrix1x4::new(
            phi(-1.0, -1.0),
            phi( 1.0, -1.0),
            phi( 1.0,  1.0),
            phi(-1.0,  1.0),
        )
    }

    #[rustfmt::skip]
    pub fn gradients(&self, xi: &Point2<f64>) -> Matrix2x4<f64> {
        let phi_grad = |alpha: f64, beta: f64|
            Vector2::new(
                alpha * (1.0 + beta * xi[1]) / 4.0,
                beta * (1.0 + alpha * xi[0]) / 4.0,
            );

        Matrix2x4::from_columns(&[
            phi_grad(-1.0, -1.0),
            phi_grad( 1.0, -1.0),
            phi_grad( 1.0,  1.0),
            phi_grad(-1.0,  1.0),
        ])
    }

    fn vertex_matrix(&self) -> Matrix2x4<f64> {
        Matrix2x4::from_fn(|i, j| self.vertices[j][i])
    }

    #[allow(non_snake_case)]
    pub fn map_reference_coords(&self, xi: &Point2<f64>) -> Point2<f64> {
        let X = self.vertex_matrix();
        let N = self.evaluate_basis(xi);
        Point2::from(X * N.transpose())
    }

    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self, xi: &Point2<f64>) -> Matrix2<f64> {
        let X = self.vertex_matrix();
        let G = self.gradients(xi);
        X * G.transpose()
    }

    pub fn diameter(&self) -> f64 {
        self.vertices
            .iter()
            .tuple_combinations()
            .map(|(x, y)| distance(x, y))
            .fold(0.0, f64::max)
    }

    /// Gradients of the basis functions with respect to physical coordinates at `xi`.
    ///
    /// Returns `None` if the reference Jacobian is singular at `xi`.
    pub fn physical_gradients(&self, xi: &Point2<f64>) -> Option<Matrix2x4<f64>> {
        let j_inv_t = self.reference_jacobian(xi).try_inverse()?.transpose();
        Some(j_inv_t * self.gradients(xi))
    }

    /// Finds reference coordinates `xi` with `T(xi) = x` by Newton's method.
    ///
    /// Convergence is measured relative to the element diameter. Returns `None` if the
    /// iteration does not converge or encounters a singular Jacobian, which happens for
    /// points far outside of (or degenerate) elements.
    pub fn map_physical_coordinates(&self, x: &Point2<f64>) -> Option<Point2<f64>> {
        let tolerance = 1e-12 * self.diameter().max(f64::MIN_POSITIVE);
        let mut xi = Point2::origin();
        for _ in 0..INVERSE_MAP_MAX_ITERATIONS {
            let residual = self.map_reference_coords(&xi) - x;
            if residual.norm() <= tolerance {
                return Some(xi);
            }
            let j = self.reference_jacobian(&xi);
            let dxi = j.lu().solve(&residual)?;
            xi -= dxi;
        }
        let residual = self.map_reference_coords(&xi) - x;
        (residual.norm() <= tolerance).then_some(xi)
    }

    /// Returns `true` if `xi` lies in the closed reference square, up to
    /// [`REFERENCE_CONTAINMENT_TOLERANCE`].
    pub fn reference_contains(xi: &Point2<f64>) -> bool {
        let bound = 1.0 + REFERENCE_CONTAINMENT_TOLERANCE;
        xi.iter().all(|x_i| x_i.abs() <= bound)
    }
}
