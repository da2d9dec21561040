use fenris_dirac::element::Quad4Element;
use fenris_dirac::nalgebra::{Point2, Vector2};
use fenris_dirac::proptest::point2;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use proptest::prelude::*;

fn skewed_quad() -> Quad4Element {
    Quad4Element::from_vertices([
        Point2::new(0.0, 0.0),
        Point2::new(2.0, 0.5),
        Point2::new(2.5, 2.0),
        Point2::new(-0.5, 1.5),
    ])
}

#[test]
fn quad4_basis_is_nodal() {
    let quad = Quad4Element::reference();
    for (i, vertex) in quad.vertices().iter().enumerate() {
        let phi = quad.evaluate_basis(vertex);
        for j in 0..4 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_scalar_eq!(phi[j], expected, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn quad4_map_physical_coordinates_inverts_reference_map() {
    let quad = skewed_quad();
    let xi = Point2::new(0.3, -0.7);
    let x = quad.map_reference_coords(&xi);
    let xi_found = quad.map_physical_coordinates(&x).unwrap();
    assert_matrix_eq!(xi_found.coords, xi.coords, comp = abs, tol = 1e-10);
}

#[test]
fn quad4_reference_contains() {
    assert!(Quad4Element::reference_contains(&Point2::new(1.0, -1.0)));
    assert!(Quad4Element::reference_contains(&Point2::new(0.0, 0.0)));
    assert!(!Quad4Element::reference_contains(&Point2::new(1.01, 0.0)));
}

#[test]
fn quad4_physical_gradients_of_scaled_square() {
    let quad = Quad4Element::from_vertices([
        Point2::new(0.0, 0.0),
        Point2::new(0.5, 0.0),
        Point2::new(0.5, 0.5),
        Point2::new(0.0, 0.5),
    ]);
    let gradients = quad.physical_gradients(&Point2::origin()).unwrap();
    // At the centroid every basis function has gradient (+-1, +-1) on a square of side 0.5
    assert_matrix_eq!(gradients.column(0), Vector2::new(-1.0, -1.0), comp = abs, tol = 1e-12);
    assert_matrix_eq!(gradients.column(2), Vector2::new(1.0, 1.0), comp = abs, tol = 1e-12);
}

#[test]
fn quad4_diameter() {
    let quad = Quad4Element::reference();
    assert_scalar_eq!(quad.diameter(), 8.0_f64.sqrt(), comp = abs, tol = 1e-14);
}

proptest! {
    #[test]
    fn quad4_basis_is_partition_of_unity(xi in point2()) {
        let phi = skewed_quad().evaluate_basis(&xi);
        prop_assert!((phi.sum() - 1.0).abs() < 1e-10);
    }
}
