//! The mesh collaborator.
//!
//! The Dirac subsystem never walks mesh topology on its own. It needs to know which
//! elements exist, which partition owns each of them, which subdomain each belongs to,
//! and how to evaluate basis functions at arbitrary physical points inside an element.
//! [`DiracMesh`] captures exactly that. [`QuadMesh`] is a small structured
//! implementation built from bilinear quadrilaterals embedded in the `z = 0` plane.
use crate::element::{Quad4Element, ReferencePoint};
use crate::point::{PhysicalPoint, POINT_TOLERANCE};
use nalgebra::{Point2, Point3, Vector2, Vector3};

/// Subdomain identifier.
pub type SubdomainId = usize;

/// An axis-aligned bounding box in physical space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingBox {
    min: PhysicalPoint,
    max: PhysicalPoint,
}

impl BoundingBox {
    pub fn new(min: PhysicalPoint, max: PhysicalPoint) -> Self {
        Self { min, max }
    }

    /// The smallest box containing all the given points.
    ///
    /// Returns `None` if `points` is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a PhysicalPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| {
            (min.coords.inf(&p.coords).into(), max.coords.sup(&p.coords).into())
        });
        Some(Self { min, max })
    }

    pub fn min(&self) -> &PhysicalPoint {
        &self.min
    }

    pub fn max(&self) -> &PhysicalPoint {
        &self.max
    }

    /// Enlarges the box by `margin` in every direction.
    pub fn padded(&self, margin: f64) -> Self {
        let pad = Vector3::repeat(margin);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    pub fn contains_point(&self, point: &PhysicalPoint) -> bool {
        (0..3).all(|i| self.min[i] <= point[i] && point[i] <= self.max[i])
    }
}

/// Mesh queries required by the Dirac subsystem.
///
/// Element and node indices are dense, starting at zero. Implementations must be
/// consistent across partitions: every partition sees the same element indices, and
/// [`element_processor`](Self::element_processor) tells which of them is the owner.
pub trait DiracMesh: Send + Sync {
    fn num_elements(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn element_subdomain(&self, element: usize) -> SubdomainId;

    /// Rank of the partition owning `element`.
    fn element_processor(&self, element: usize) -> usize;

    fn element_nodes(&self, element: usize) -> &[usize];

    fn element_bounds(&self, element: usize) -> BoundingBox;

    /// Reference coordinates of `point` with respect to `element`, or `None` if the point is
    /// not contained in the element.
    fn locate_in_element(&self, element: usize, point: &PhysicalPoint) -> Option<ReferencePoint>;

    /// Fills `basis` with the values of the element basis functions at `xi`.
    fn populate_element_basis(&self, element: usize, xi: &ReferencePoint, basis: &mut [f64]);

    /// Fills `gradients` with the physical gradients of the element basis functions at `xi`.
    fn populate_element_gradients(&self, element: usize, xi: &ReferencePoint, gradients: &mut [Vector3<f64>]);

    fn element_contains_point(&self, element: usize, point: &PhysicalPoint) -> bool {
        self.locate_in_element(element, point).is_some()
    }
}

/// A mesh of bilinear quadrilaterals in the `z = 0` plane.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadMesh {
    vertices: Vec<Point2<f64>>,
    connectivity: Vec<[usize; 4]>,
    subdomains: Vec<SubdomainId>,
    processors: Vec<usize>,
}

impl QuadMesh {
    /// Creates a mesh from vertices and counter-clockwise element connectivity.
    ///
    /// All elements are placed in subdomain `0` and owned by partition `0`.
    ///
    /// # Panics
    ///
    /// Panics if a connectivity entry refers to a vertex that does not exist.
    pub fn from_vertices_and_connectivity(vertices: Vec<Point2<f64>>, connectivity: Vec<[usize; 4]>) -> Self {
        assert!(
            connectivity.iter().flatten().all(|&v| v < vertices.len()),
            "Connectivity must only refer to existing vertices"
        );
        let n = connectivity.len();
        Self {
            vertices,
            connectivity,
            subdomains: vec![0; n],
            processors: vec![0; n],
        }
    }

    /// Creates a uniform grid of `cells_x * cells_y` square cells with side `cell_size`,
    /// with `origin` at the bottom-left corner.
    ///
    /// Elements are numbered row by row, starting at the bottom-left.
    pub fn create_rectangular_uniform(cells_x: usize, cells_y: usize, cell_size: f64, origin: &Point2<f64>) -> Self {
        if cells_x == 0 || cells_y == 0 {
            return Self::from_vertices_and_connectivity(Vec::new(), Vec::new());
        }

        let num_vertices_x = cells_x + 1;
        let to_global_vertex_index = |i: usize, j: usize| num_vertices_x * j + i;

        let mut vertices = Vec::with_capacity(num_vertices_x * (cells_y + 1));
        for j in 0..=cells_y {
            for i in 0..=cells_x {
                vertices.push(origin + Vector2::new(i as f64, j as f64) * cell_size);
            }
        }

        let mut connectivity = Vec::with_capacity(cells_x * cells_y);
        for j in 0..cells_y {
            for i in 0..cells_x {
                connectivity.push([
                    to_global_vertex_index(i, j),
                    to_global_vertex_index(i + 1, j),
                    to_global_vertex_index(i + 1, j + 1),
                    to_global_vertex_index(i, j + 1),
                ]);
            }
        }

        Self::from_vertices_and_connectivity(vertices, connectivity)
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[[usize; 4]] {
        &self.connectivity
    }

    pub fn element(&self, element: usize) -> Quad4Element {
        let conn = &self.connectivity[element];
        Quad4Element::from_vertices(conn.map(|v| self.vertices[v]))
    }

    pub fn set_element_subdomain(&mut self, element: usize, subdomain: SubdomainId) {
        self.subdomains[element] = subdomain;
    }

    /// Assigns subdomains to all elements by evaluating `f` at element centroids.
    pub fn assign_subdomains(&mut self, f: impl Fn(&Point2<f64>) -> SubdomainId) {
        for element in 0..self.connectivity.len() {
            let centroid = self.element(element).map_reference_coords(&Point2::origin());
            self.subdomains[element] = f(&centroid);
        }
    }

    /// Assigns owning partitions to all elements by evaluating `f` at element centroids.
    pub fn partition(&mut self, f: impl Fn(&Point2<f64>) -> usize) {
        for element in 0..self.connectivity.len() {
            let centroid = self.element(element).map_reference_coords(&Point2::origin());
            self.processors[element] = f(&centroid);
        }
    }

    /// Rigidly moves the whole mesh.
    pub fn translate(&mut self, displacement: &Vector2<f64>) {
        for v in &mut self.vertices {
            *v += displacement;
        }
    }
}

fn planar(point: &PhysicalPoint) -> Option<Point2<f64>> {
    (point.z.abs() < POINT_TOLERANCE).then(|| Point2::new(point.x, point.y))
}

impl DiracMesh for QuadMesh {
    fn num_elements(&self) -> usize {
        self.connectivity.len()
    }

    fn num_nodes(&self) -> usize {
        self.vertices.len()
    }

    fn element_subdomain(&self, element: usize) -> SubdomainId {
        self.subdomains[element]
    }

    fn element_processor(&self, element: usize) -> usize {
        self.processors[element]
    }

    fn element_nodes(&self, element: usize) -> &[usize] {
        &self.connectivity[element]
    }

    fn element_bounds(&self, element: usize) -> BoundingBox {
        let corners = self.connectivity[element].map(|v| {
            let v = &self.vertices[v];
            Point3::new(v.x, v.y, 0.0)
        });
        BoundingBox::from_points(&corners).expect("Quadrilaterals always have four vertices")
    }

    fn locate_in_element(&self, element: usize, point: &PhysicalPoint) -> Option<ReferencePoint> {
        let x = planar(point)?;
        let xi = self.element(element).map_physical_coordinates(&x)?;
        Quad4Element::reference_contains(&xi).then(|| Point3::new(xi.x, xi.y, 0.0))
    }

    fn populate_element_basis(&self, element: usize, xi: &ReferencePoint, basis: &mut [f64]) {
        let phi = self.element(element).evaluate_basis(&xi.xy());
        basis.copy_from_slice(phi.as_slice());
    }

    fn populate_element_gradients(&self, element: usize, xi: &ReferencePoint, gradients: &mut [Vector3<f64>]) {
        let quad = self.element(element);
        match quad.physical_gradients(&xi.xy()) {
            Some(g) => {
                for (gradient, column) in gradients.iter_mut().zip(g.column_iter()) {
                    *gradient = Vector3::new(column[0], column[1], 0.0);
                }
            }
            // Degenerate elements have no meaningful gradients
            None => gradients.fill(Vector3::zeros()),
        }
    }
}
