use crate::unit_tests::unit_square_mesh;
use fenris_dirac::mesh::QuadMesh;
use fenris_dirac::nalgebra::{Point2, Point3, Vector2};
use fenris_dirac::parallel::SerialCommunicator;
use fenris_dirac::point::POINT_TOLERANCE;
use fenris_dirac::proptest::{planar_point_in, planar_points_with_duplicates, point_near};
use fenris_dirac::registry::{PointOwnership, PointRegistry, PointStore};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn serial_registry() -> PointRegistry {
    PointRegistry::new(Arc::new(SerialCommunicator))
}

#[test]
fn point_store_merges_same_location() {
    let mut store = PointStore::new();
    let p = Point3::new(0.5, 0.5, 0.0);
    let q = Point3::new(0.5 + 0.1 * POINT_TOLERANCE, 0.5, 0.0);
    let r = Point3::new(0.25, 0.5, 0.0);

    store.add_point(3, &p);
    store.add_point(3, &q);
    store.add_point(3, &r);

    let set = store.points_on(3);
    assert_eq!(set.points(), &[p, r]);
    assert_eq!(set.multiplicities(), &[2, 1]);
    assert_eq!(set.total_multiplicity(), 3);
    assert_eq!(store.multiplicity(3, &q), Some(2));
    assert_eq!(store.multiplicity(2, &q), None);
    assert!(store.has_point(3, &r));
    assert!(!store.has_point(3, &Point3::new(0.0, 0.0, 0.0)));
    assert_eq!(store.elements_with_points(), &BTreeSet::from([3]));
    assert_eq!(store.num_points(), 2);
}

#[test]
fn point_store_merges_into_first_matching_entry() {
    let spacing = 0.6 * POINT_TOLERANCE;
    let a = Point3::new(0.0, 0.0, 0.0);
    let c = Point3::new(2.0 * spacing, 0.0, 0.0);
    let b = Point3::new(spacing, 0.0, 0.0);

    let mut store = PointStore::new();
    store.add_point(0, &a);
    store.add_point(0, &c);
    // b is the same location as both a and c
    store.add_point(0, &b);

    let set = store.points_on(0);
    assert_eq!(set.points(), &[a, c]);
    assert_eq!(set.multiplicities(), &[2, 1]);
}

#[test]
fn point_store_with_custom_tolerance() {
    let mut store = PointStore::with_tolerance(0.1);
    store.add_point(0, &Point3::new(0.0, 0.0, 0.0));
    store.add_point(0, &Point3::new(0.05, 0.0, 0.0));
    assert_eq!(store.tolerance(), 0.1);
    assert_eq!(store.points_on(0).len(), 1);
}

#[test]
#[should_panic]
fn point_store_rejects_negative_tolerance() {
    PointStore::with_tolerance(-1.0);
}

#[test]
fn points_on_element_without_points_is_empty() {
    let store = PointStore::new();
    assert!(store.points_on(42).is_empty());
    assert!(!store.has_points_on(42));
}

#[test]
fn serial_ownership_resolution() {
    let registry = serial_registry();
    assert_eq!(registry.resolve_point_ownership(Some(3)), PointOwnership::Local(3));
    assert_eq!(registry.resolve_point_ownership(None), PointOwnership::NotFound);
    assert!(registry.resolve_ownership(Some(0)));
    assert!(!registry.resolve_ownership(None));
}

#[test]
fn find_owning_element_builds_locator_lazily() {
    let mesh = unit_square_mesh(2);
    let mut registry = serial_registry();
    assert!(!registry.has_locator());

    let element = registry
        .find_owning_element(&Point3::new(0.75, 0.25, 0.0), &mesh, None)
        .unwrap();
    assert_eq!(element, Some(1));
    assert!(registry.has_locator());
    assert_eq!(registry.locator_builds(), 1);

    // Points outside of the mesh are simply not found
    let element = registry
        .find_owning_element(&Point3::new(3.0, 0.25, 0.0), &mesh, None)
        .unwrap();
    assert_eq!(element, None);
    assert_eq!(registry.locator_builds(), 1);
}

#[test]
fn find_owning_element_picks_smallest_element_on_shared_vertex() {
    let mesh = unit_square_mesh(2);
    let mut registry = serial_registry();
    let center = Point3::new(0.5, 0.5, 0.0);
    assert_eq!(registry.find_owning_element(&center, &mesh, None).unwrap(), Some(0));

    let blocks = BTreeSet::from([0]);
    assert_eq!(
        registry
            .find_owning_element(&center, &mesh, Some(&blocks))
            .unwrap(),
        Some(0)
    );
    let other_blocks = BTreeSet::from([5]);
    assert_eq!(
        registry
            .find_owning_element(&center, &mesh, Some(&other_blocks))
            .unwrap(),
        None
    );
}

#[test]
fn notify_mesh_changed_rebuilds_only_with_points() {
    let mut mesh = unit_square_mesh(2);
    let mut registry = serial_registry();

    // No points anywhere: nothing is built
    registry.notify_mesh_changed(&mesh);
    assert!(!registry.has_locator());
    assert_eq!(registry.locator_builds(), 0);

    let p = Point3::new(0.25, 0.25, 0.0);
    let element = registry
        .find_owning_element(&p, &mesh, None)
        .unwrap()
        .unwrap();
    registry.add_point(element, &p);
    assert_eq!(registry.locator_builds(), 1);

    mesh.translate(&Vector2::new(0.5, 0.0));
    registry.notify_mesh_changed(&mesh);
    assert_eq!(registry.locator_builds(), 2);
    // The rebuilt locator sees the moved mesh
    assert_eq!(registry.find_owning_element(&p, &mesh, None).unwrap(), None);
    assert_eq!(
        registry
            .find_owning_element(&Point3::new(0.8, 0.25, 0.0), &mesh, None)
            .unwrap(),
        Some(0)
    );

    // Without points the stale locator is dropped
    registry.clear_points();
    registry.notify_mesh_changed(&mesh);
    assert!(!registry.has_locator());
}

#[test]
fn stale_locator_is_used_until_notified() {
    let mut mesh = QuadMesh::create_rectangular_uniform(1, 1, 1.0, &Point2::origin());
    let mut registry = serial_registry();
    let p = Point3::new(0.5, 0.5, 0.0);
    assert_eq!(registry.find_owning_element(&p, &mesh, None).unwrap(), Some(0));
    registry.add_point(0, &p);

    mesh.translate(&Vector2::new(0.25, 0.0));
    let moved = Point3::new(1.1, 0.5, 0.0);
    // The locator still indexes the old bounding boxes
    assert_eq!(registry.find_owning_element(&moved, &mesh, None).unwrap(), None);
    registry.notify_mesh_changed(&mesh);
    assert_eq!(registry.find_owning_element(&moved, &mesh, None).unwrap(), Some(0));
}

proptest! {
    #[test]
    fn add_point_is_idempotent_in_entries(p in planar_point_in(0.0, 1.0), n in 1..10usize) {
        let mut store = PointStore::new();
        for _ in 0..n {
            store.add_point(0, &p);
        }
        prop_assert_eq!(store.points_on(0).len(), 1);
        prop_assert_eq!(store.multiplicity(0, &p), Some(n));
    }

    #[test]
    fn nearby_point_increments_same_entry(
        (p, q) in planar_point_in(0.0, 1.0).prop_flat_map(|p| (Just(p), point_near(p)))
    ) {
        let mut store = PointStore::new();
        store.add_point(0, &p);
        store.add_point(0, &q);
        prop_assert_eq!(store.points_on(0).points(), &[p]);
        prop_assert_eq!(store.points_on(0).multiplicities(), &[2]);
    }

    #[test]
    fn multiplicities_are_conserved(points in planar_points_with_duplicates(0.0, 1.0, 8)) {
        let mut store = PointStore::new();
        for (i, p) in points.iter().enumerate() {
            store.add_point(i % 3, p);
        }
        let total: usize = (0..3).map(|e| store.points_on(e).total_multiplicity()).sum();
        prop_assert_eq!(total, points.len());
        for e in 0..3 {
            let set = store.points_on(e);
            prop_assert_eq!(set.points().len(), set.multiplicities().len());
            prop_assert!(set.multiplicities().iter().all(|&m| m >= 1));
        }
    }

    #[test]
    fn clear_points_resets_store(points in planar_points_with_duplicates(0.0, 1.0, 8)) {
        let mut store = PointStore::new();
        for (i, p) in points.iter().enumerate() {
            store.add_point(i, p);
        }
        store.clear_points();
        prop_assert!(store.elements_with_points().is_empty());
        prop_assert_eq!(store.num_points(), 0);
        for (i, p) in points.iter().enumerate() {
            prop_assert!(!store.has_point(i, p));
        }
    }
}
