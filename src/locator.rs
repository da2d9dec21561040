//! Locating physical points in the local part of a mesh.
use crate::error::DiracError;
use crate::mesh::{DiracMesh, SubdomainId};
use crate::parallel::Communicator;
use crate::point::{PhysicalPoint, POINT_TOLERANCE};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use std::collections::BTreeSet;
use std::fmt;

/// A spatial index answering "which local element contains this point?".
///
/// A locator is a snapshot of the mesh at the time it was built. It must be rebuilt
/// whenever the mesh moves or is refined, which is the responsibility of
/// [`PointRegistry::notify_mesh_changed`](crate::registry::PointRegistry::notify_mesh_changed).
pub trait PointLocator: Send + Sync {
    /// After this call, points outside the local mesh are reported as not found rather
    /// than as an error.
    fn enable_out_of_mesh_mode(&mut self);

    fn is_out_of_mesh_mode_enabled(&self) -> bool;

    /// Returns the locally owned element containing `point`, restricted to `subdomains`
    /// if given.
    ///
    /// If several local elements contain the point (the point is on a shared face or
    /// vertex), the element with the smallest index is returned.
    fn locate(
        &self,
        mesh: &dyn DiracMesh,
        point: &PhysicalPoint,
        subdomains: Option<&BTreeSet<SubdomainId>>,
    ) -> Result<Option<usize>, DiracError>;
}

/// Constructs a locator for the local part of a mesh.
///
/// Building a locator is a collective operation and must be invoked on every partition.
pub type LocatorBuilder = fn(&dyn DiracMesh, &dyn Communicator) -> Box<dyn PointLocator>;

type ElementEnvelope = GeomWithData<Rectangle<[f64; 3]>, usize>;

/// A point locator backed by an R-tree over (slightly enlarged) element bounding boxes.
///
/// Only elements owned by the local partition are indexed.
pub struct RTreePointLocator {
    tree: RTree<ElementEnvelope>,
    out_of_mesh_mode: bool,
}

impl fmt::Debug for RTreePointLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RTreePointLocator")
            .field("num_elements", &self.tree.size())
            .field("out_of_mesh_mode", &self.out_of_mesh_mode)
            .finish()
    }
}

impl RTreePointLocator {
    pub fn build(mesh: &dyn DiracMesh, comm: &dyn Communicator) -> Self {
        let rank = comm.rank();
        let envelopes: Vec<ElementEnvelope> = (0..mesh.num_elements())
            .filter(|&element| mesh.element_processor(element) == rank)
            .map(|element| {
                let bounds = mesh.element_bounds(element);
                // Enlarge the box to accommodate floating point error in the containment test
                let diagonal = (bounds.max() - bounds.min()).norm();
                let bounds = bounds.padded(0.005 * diagonal + POINT_TOLERANCE);
                let min: [f64; 3] = bounds.min().coords.into();
                let max: [f64; 3] = bounds.max().coords.into();
                GeomWithData::new(Rectangle::from_corners(min, max), element)
            })
            .collect();
        let tree = RTree::bulk_load(envelopes);
        log::debug!("Built point locator over {} local elements on rank {}", tree.size(), rank);

        // Other partitions build their trees at the same time
        comm.barrier();

        Self {
            tree,
            out_of_mesh_mode: false,
        }
    }

    /// A [`LocatorBuilder`] producing boxed [`RTreePointLocator`]s.
    pub fn boxed(mesh: &dyn DiracMesh, comm: &dyn Communicator) -> Box<dyn PointLocator> {
        Box::new(Self::build(mesh, comm))
    }

    pub fn num_elements(&self) -> usize {
        self.tree.size()
    }
}

impl PointLocator for RTreePointLocator {
    fn enable_out_of_mesh_mode(&mut self) {
        self.out_of_mesh_mode = true;
    }

    fn is_out_of_mesh_mode_enabled(&self) -> bool {
        self.out_of_mesh_mode
    }

    fn locate(
        &self,
        mesh: &dyn DiracMesh,
        point: &PhysicalPoint,
        subdomains: Option<&BTreeSet<SubdomainId>>,
    ) -> Result<Option<usize>, DiracError> {
        let query: [f64; 3] = point.coords.into();
        let mut in_local_mesh = false;
        let mut result: Option<usize> = None;
        for candidate in self.tree.locate_all_at_point(&query) {
            let element = candidate.data;
            if !mesh.element_contains_point(element, point) {
                continue;
            }
            in_local_mesh = true;
            let allowed = subdomains
                .map(|blocks| blocks.contains(&mesh.element_subdomain(element)))
                .unwrap_or(true);
            if allowed && result.map(|current| element < current).unwrap_or(true) {
                result = Some(element);
            }
        }

        if !in_local_mesh && !self.out_of_mesh_mode {
            return Err(DiracError::PointOutsideMesh(*point));
        }
        Ok(result)
    }
}
