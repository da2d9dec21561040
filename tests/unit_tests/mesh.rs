use crate::unit_tests::unit_square_mesh;
use fenris_dirac::mesh::{BoundingBox, DiracMesh, QuadMesh};
use fenris_dirac::nalgebra::{Point2, Point3, Vector2, Vector3};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};

#[test]
fn rectangular_uniform_mesh_numbering() {
    let mesh = QuadMesh::create_rectangular_uniform(2, 1, 0.5, &Point2::new(1.0, 1.0));
    assert_eq!(mesh.num_elements(), 2);
    assert_eq!(mesh.num_nodes(), 6);
    assert_eq!(mesh.connectivity(), &[[0, 1, 4, 3], [1, 2, 5, 4]]);
    assert_eq!(mesh.vertices()[5], Point2::new(2.0, 1.5));

    let empty = QuadMesh::create_rectangular_uniform(0, 3, 1.0, &Point2::origin());
    assert_eq!(empty.num_elements(), 0);
}

#[test]
fn element_bounds_cover_element() {
    let mesh = unit_square_mesh(2);
    let bounds = mesh.element_bounds(3);
    assert_eq!(bounds, BoundingBox::new(Point3::new(0.5, 0.5, 0.0), Point3::new(1.0, 1.0, 0.0)));
    assert!(bounds.contains_point(&Point3::new(0.75, 0.6, 0.0)));
    assert!(!bounds.contains_point(&Point3::new(0.25, 0.6, 0.0)));
}

#[test]
fn locate_in_element_returns_reference_coordinates() {
    let mesh = unit_square_mesh(2);
    let xi = mesh
        .locate_in_element(0, &Point3::new(0.25, 0.25, 0.0))
        .unwrap();
    assert_matrix_eq!(xi.coords, Vector3::zeros(), comp = abs, tol = 1e-12);

    let xi = mesh
        .locate_in_element(0, &Point3::new(0.5, 0.5, 0.0))
        .unwrap();
    assert_matrix_eq!(xi.coords, Vector3::new(1.0, 1.0, 0.0), comp = abs, tol = 1e-12);

    assert!(mesh
        .locate_in_element(0, &Point3::new(0.75, 0.25, 0.0))
        .is_none());
}

#[test]
fn points_off_the_mesh_plane_are_not_contained() {
    let mesh = unit_square_mesh(1);
    assert!(mesh.element_contains_point(0, &Point3::new(0.5, 0.5, 0.0)));
    assert!(!mesh.element_contains_point(0, &Point3::new(0.5, 0.5, 0.1)));
}

#[test]
fn basis_at_node_is_nodal() {
    let mesh = unit_square_mesh(2);
    let xi = mesh
        .locate_in_element(0, &Point3::new(0.5, 0.5, 0.0))
        .unwrap();
    let mut phi = [0.0; 4];
    mesh.populate_element_basis(0, &xi, &mut phi);
    assert_scalar_eq!(phi[2], 1.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(phi[0] + phi[1] + phi[3], 0.0, comp = abs, tol = 1e-12);

    let mut gradients = [Vector3::zeros(); 4];
    mesh.populate_element_gradients(0, &xi, &mut gradients);
    let sum: Vector3<f64> = gradients.iter().sum();
    assert_matrix_eq!(sum, Vector3::zeros(), comp = abs, tol = 1e-12);
}

#[test]
fn subdomains_and_partitions_are_assigned_at_centroids() {
    let mut mesh = unit_square_mesh(2);
    mesh.assign_subdomains(|centroid| if centroid.x < 0.5 { 1 } else { 2 });
    mesh.partition(|centroid| if centroid.y < 0.5 { 0 } else { 1 });
    assert_eq!((0..4).map(|e| mesh.element_subdomain(e)).collect::<Vec<_>>(), vec![1, 2, 1, 2]);
    assert_eq!((0..4).map(|e| mesh.element_processor(e)).collect::<Vec<_>>(), vec![0, 0, 1, 1]);

    mesh.set_element_subdomain(3, 7);
    assert_eq!(mesh.element_subdomain(3), 7);
}

#[test]
fn translate_moves_every_vertex() {
    let mut mesh = unit_square_mesh(1);
    mesh.translate(&Vector2::new(2.0, 0.0));
    assert_eq!(mesh.vertices()[0], Point2::new(2.0, 0.0));
    assert!(!mesh.element_contains_point(0, &Point3::new(0.5, 0.5, 0.0)));
    assert!(mesh.element_contains_point(0, &Point3::new(2.5, 0.5, 0.0)));
}
