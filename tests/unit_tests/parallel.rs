use crate::unit_tests::{single_variable_dofs, unit_square_mesh};
use fenris_dirac::assembly::{GlobalSystem, TagId};
use fenris_dirac::kernel::sources::{ConstantPointSource, ConstantPointSourceParameters};
use fenris_dirac::kernel::{DiracKernelParameters, PointNotFoundBehavior};
use fenris_dirac::mesh::QuadMesh;
use fenris_dirac::nalgebra::{DVector, Point3, Vector2};
use fenris_dirac::parallel::{Communicator, SerialCommunicator, SimulatedCommunicator};
use fenris_dirac::registry::{PointOwnership, PointRegistry};
use fenris_dirac::system::{AssemblyContext, DiracSystem};
use matrixcompare::assert_matrix_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

/// Runs `f` on every partition of a simulated group, each partition on its own thread.
fn run_partitions<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(SimulatedCommunicator) -> T + Sync,
{
    let comms = SimulatedCommunicator::group(size);
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(|| f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}

/// A 2x2 mesh of the unit square, split at `x = 0.5` between rank 0 (left) and rank 1 (right).
fn split_mesh() -> QuadMesh {
    let mut mesh = unit_square_mesh(2);
    mesh.partition(|centroid| if centroid.x < 0.5 { 0 } else { 1 });
    mesh
}

#[test]
fn simulated_communicator_reductions() {
    let results = run_partitions(3, |comm| {
        let rank = comm.rank();
        assert_eq!(comm.size(), 3);
        comm.barrier();
        let min = comm.min_usize(10 + rank);
        let max = comm.max_usize(10 + rank);
        // Repeated reductions must not interfere with each other
        let min_again = comm.min_usize(rank + 1);
        (min, max, min_again)
    });
    assert!(results.iter().all(|&result| result == (10, 12, 1)));
}

#[test]
fn serial_communicator_is_identity() {
    let comm = SerialCommunicator;
    assert_eq!(comm.rank(), 0);
    assert_eq!(comm.size(), 1);
    assert_eq!(comm.min_usize(7), 7);
    assert_eq!(comm.max_usize(7), 7);
}

#[test]
fn every_point_has_exactly_one_owner() {
    let points = [
        Point3::new(0.25, 0.25, 0.0),
        Point3::new(0.75, 0.25, 0.0),
        // On the partition interface
        Point3::new(0.5, 0.25, 0.0),
        Point3::new(0.5, 0.5, 0.0),
        // Outside of the mesh
        Point3::new(5.0, 5.0, 0.0),
    ];

    let ownership = run_partitions(2, |comm| {
        let mesh = split_mesh();
        let mut registry = PointRegistry::new(Arc::new(comm));
        points
            .iter()
            .map(|p| registry.locate_point(p, &mesh, None).unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(
        ownership[0],
        vec![
            PointOwnership::Local(0),
            PointOwnership::Remote,
            PointOwnership::Local(0),
            PointOwnership::Local(0),
            PointOwnership::NotFound
        ]
    );
    assert_eq!(
        ownership[1],
        vec![
            PointOwnership::Remote,
            PointOwnership::Local(1),
            PointOwnership::Remote,
            PointOwnership::Remote,
            PointOwnership::NotFound
        ]
    );
}

#[test]
fn partitioned_residual_matches_serial_residual() {
    let params = ConstantPointSourceParameters {
        kernel: DiracKernelParameters::new("source", "u").with_point_not_found_behavior(PointNotFoundBehavior::Ignore),
        value: 4.0,
        point: vec![0.5, 0.25, 0.0, 0.8, 0.9, 0.0, 0.1, 0.6, 0.0, 2.0, 2.0, 0.0],
        dim: 3,
    };
    let tags = BTreeSet::from([TagId::SYSTEM]);

    let evaluate = |comm: Arc<dyn Communicator>, mesh: &QuadMesh| {
        let dof_map = single_variable_dofs(mesh);
        let mut dirac = DiracSystem::new(comm);
        dirac.add_contributor(ConstantPointSource::from_parameters(&params, &dof_map).unwrap());
        let solution = DVector::zeros(9);
        let system = GlobalSystem::new(9);
        let mut context = AssemblyContext::new(mesh, &dof_map, &solution, &system);
        let report = dirac.compute_residual(&mut context, &tags).unwrap();
        (report.registered_points, system.residual(TagId::SYSTEM).unwrap())
    };

    let (serial_points, serial_residual) = evaluate(Arc::new(SerialCommunicator) as Arc<dyn Communicator>, &unit_square_mesh(2));
    assert_eq!(serial_points, 3);

    let partitioned = run_partitions(2, |comm| evaluate(Arc::new(comm) as Arc<dyn Communicator>, &split_mesh()));
    let total_points: usize = partitioned.iter().map(|(points, _)| points).sum();
    let total_residual = &partitioned[0].1 + &partitioned[1].1;
    assert_eq!(total_points, serial_points);
    assert_matrix_eq!(total_residual, serial_residual, comp = abs, tol = 1e-12);
}

#[test]
fn partition_without_points_rebuilds_locator_on_mesh_change() {
    let point = Point3::new(0.25, 0.25, 0.0);
    let builds = run_partitions(2, |comm| {
        let rank = comm.rank();
        let mut mesh = split_mesh();
        let mut registry = PointRegistry::new(Arc::new(comm));
        if let Some(element) = registry.find_owning_element(&point, &mesh, None).unwrap() {
            registry.add_point(element, &point);
        }
        assert_eq!(registry.elements_with_points().is_empty(), rank != 0);
        let initial = registry.locator_builds();

        // Some partition has points, so every partition rebuilds
        mesh.translate(&Vector2::new(0.05, 0.0));
        registry.notify_mesh_changed(&mesh);
        let after_change = registry.locator_builds();
        assert!(registry.has_locator());

        // No partition has points, so every partition discards its locator
        registry.clear_points();
        registry.notify_mesh_changed(&mesh);
        assert!(!registry.has_locator());
        (initial, after_change, registry.locator_builds())
    });
    assert_eq!(builds, vec![(1, 2, 2), (1, 2, 2)]);
}

#[test]
fn dirac_system_mesh_change_with_points_on_one_partition() {
    let params = ConstantPointSourceParameters {
        kernel: DiracKernelParameters::new("source", "u"),
        value: 1.0,
        point: vec![0.25, 0.25],
        dim: 2,
    };
    let tags = BTreeSet::from([TagId::SYSTEM]);

    let results = run_partitions(2, |comm| {
        let mut mesh = split_mesh();
        let dof_map = single_variable_dofs(&mesh);
        let mut dirac = DiracSystem::new(Arc::new(comm));
        dirac.add_contributor(ConstantPointSource::from_parameters(&params, &dof_map).unwrap());
        let solution = DVector::zeros(9);
        let system = GlobalSystem::new(9);
        let registered = {
            let mut context = AssemblyContext::new(&mesh, &dof_map, &solution, &system);
            dirac.compute_residual(&mut context, &tags).unwrap().registered_points
        };
        let before = dirac.registry().locator_builds();

        mesh.translate(&Vector2::new(0.05, 0.0));
        dirac.mesh_changed(&mesh);
        (registered, dirac.registry().locator_builds() - before)
    });
    assert_eq!(results, vec![(1, 1), (0, 1)]);
}
