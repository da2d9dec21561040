use fenris_dirac::dof::NodalDofMap;
use fenris_dirac::mesh::{DiracMesh, QuadMesh};
use fenris_dirac::nalgebra::Point2;

mod assembly;
mod element;
mod mesh;
mod parallel;
mod registry;

/// A uniform mesh of `[0, 1]^2` with `cells` elements in each direction.
pub fn unit_square_mesh(cells: usize) -> QuadMesh {
    QuadMesh::create_rectangular_uniform(cells, cells, 1.0 / cells as f64, &Point2::origin())
}

/// A DOF map with a single variable `u` on every node of `mesh`.
pub fn single_variable_dofs(mesh: &QuadMesh) -> NodalDofMap {
    let mut dof_map = NodalDofMap::new(mesh.num_nodes());
    dof_map.add_variable("u");
    dof_map
}
