//! Registration of Dirac points on mesh elements.
//!
//! [`PointStore`] is the plain data structure: for each element, the distinct points
//! registered on it and how many times each of them was registered. [`PointRegistry`] wraps
//! the store shared by every contributor together with the point locator and the
//! communicator needed to decide which partition owns a point.
use crate::error::DiracError;
use crate::locator::{LocatorBuilder, PointLocator, RTreePointLocator};
use crate::mesh::{DiracMesh, SubdomainId};
use crate::parallel::Communicator;
use crate::point::{same_location_with_tolerance, PhysicalPoint, POINT_TOLERANCE};
use itertools::izip;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// The distinct points registered on a single element, with their multiplicities.
///
/// `points` are kept in order of first registration; `multiplicities[i]` counts how many
/// registrations collapsed onto `points[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPointSet {
    points: Vec<PhysicalPoint>,
    multiplicities: Vec<usize>,
}

static EMPTY_POINT_SET: ElementPointSet = ElementPointSet::new();

impl ElementPointSet {
    pub const fn new() -> Self {
        Self {
            points: Vec::new(),
            multiplicities: Vec::new(),
        }
    }

    pub fn points(&self) -> &[PhysicalPoint] {
        &self.points
    }

    pub fn multiplicities(&self) -> &[usize] {
        &self.multiplicities
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PhysicalPoint, usize)> {
        izip!(&self.points, self.multiplicities.iter().copied())
    }

    /// Sum of all multiplicities, i.e. the number of registrations on the element.
    pub fn total_multiplicity(&self) -> usize {
        self.multiplicities.iter().sum()
    }

    fn find(&self, point: &PhysicalPoint, tolerance: f64) -> Option<usize> {
        self.points
            .iter()
            .position(|existing| same_location_with_tolerance(existing, point, tolerance))
    }

    fn insert(&mut self, point: &PhysicalPoint, tolerance: f64) -> usize {
        match self.find(point, tolerance) {
            Some(index) => {
                self.multiplicities[index] += 1;
                index
            }
            None => {
                self.points.push(*point);
                self.multiplicities.push(1);
                self.points.len() - 1
            }
        }
    }
}

/// Per-element storage of registered points.
#[derive(Debug, Clone)]
pub struct PointStore {
    points: BTreeMap<usize, ElementPointSet>,
    elements: BTreeSet<usize>,
    tolerance: f64,
}

impl Default for PointStore {
    fn default() -> Self {
        Self::with_tolerance(POINT_TOLERANCE)
    }
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store which merges points closer than `tolerance`.
    ///
    /// # Panics
    ///
    /// Panics if `tolerance` is negative or not finite.
    pub fn with_tolerance(tolerance: f64) -> Self {
        assert!(
            tolerance.is_finite() && tolerance >= 0.0,
            "Point tolerance must be finite and non-negative"
        );
        Self {
            points: BTreeMap::new(),
            elements: BTreeSet::new(),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Registers `point` on `element`.
    ///
    /// If points at the same location are already registered on the element, the
    /// multiplicity of the first of them is incremented instead. Returns the index of the
    /// entry in [`points_on(element)`](Self::points_on).
    pub fn add_point(&mut self, element: usize, point: &PhysicalPoint) -> usize {
        let index = self
            .points
            .entry(element)
            .or_default()
            .insert(point, self.tolerance);
        self.elements.insert(element);
        index
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
        self.elements.clear();
    }

    pub fn has_point(&self, element: usize, point: &PhysicalPoint) -> bool {
        self.multiplicity(element, point).is_some()
    }

    pub fn has_points_on(&self, element: usize) -> bool {
        self.elements.contains(&element)
    }

    /// Multiplicity of the entry on `element` at the same location as `point`, if any.
    pub fn multiplicity(&self, element: usize, point: &PhysicalPoint) -> Option<usize> {
        let set = self.points.get(&element)?;
        set.find(point, self.tolerance)
            .map(|index| set.multiplicities[index])
    }

    pub fn elements_with_points(&self) -> &BTreeSet<usize> {
        &self.elements
    }

    /// The points registered on `element`. Empty if there are none.
    pub fn points_on(&self, element: usize) -> &ElementPointSet {
        self.points.get(&element).unwrap_or(&EMPTY_POINT_SET)
    }

    /// Total number of distinct points over all elements.
    pub fn num_points(&self) -> usize {
        self.points.values().map(ElementPointSet::len).sum()
    }
}

/// Result of resolving which partition owns a point.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointOwnership {
    /// The local partition owns the point, which lies in the given element.
    Local(usize),
    /// Another partition owns the point.
    Remote,
    /// No partition found an element containing the point.
    NotFound,
}

impl PointOwnership {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn local_element(&self) -> Option<usize> {
        match self {
            Self::Local(element) => Some(*element),
            _ => None,
        }
    }
}

/// The point registry shared by every Dirac contributor of a system.
///
/// Besides the [`PointStore`], the registry owns the point locator. The locator is built
/// lazily and rebuilt through [`notify_mesh_changed`](Self::notify_mesh_changed); it is
/// never rebuilt during an ordinary residual or Jacobian evaluation.
pub struct PointRegistry {
    store: PointStore,
    locator: Option<Box<dyn PointLocator>>,
    locator_builder: LocatorBuilder,
    comm: Arc<dyn Communicator>,
    locator_builds: usize,
}

impl fmt::Debug for PointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointRegistry")
            .field("store", &self.store)
            .field("has_locator", &self.locator.is_some())
            .field("comm", &self.comm)
            .finish()
    }
}

impl PointRegistry {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self::with_store(comm, PointStore::default())
    }

    pub fn with_store(comm: Arc<dyn Communicator>, store: PointStore) -> Self {
        Self {
            store,
            locator: None,
            locator_builder: RTreePointLocator::boxed,
            comm,
            locator_builds: 0,
        }
    }

    /// Replaces the function used to construct point locators.
    pub fn with_locator_builder(mut self, builder: LocatorBuilder) -> Self {
        self.locator_builder = builder;
        self.locator = None;
        self
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn add_point(&mut self, element: usize, point: &PhysicalPoint) -> usize {
        self.store.add_point(element, point)
    }

    pub fn clear_points(&mut self) {
        self.store.clear_points()
    }

    pub fn has_point(&self, element: usize, point: &PhysicalPoint) -> bool {
        self.store.has_point(element, point)
    }

    pub fn elements_with_points(&self) -> &BTreeSet<usize> {
        self.store.elements_with_points()
    }

    pub fn points_on(&self, element: usize) -> &ElementPointSet {
        self.store.points_on(element)
    }

    pub fn has_locator(&self) -> bool {
        self.locator.is_some()
    }

    /// Number of times a point locator has been built by this registry.
    pub fn locator_builds(&self) -> usize {
        self.locator_builds
    }

    fn build_locator(&mut self, mesh: &dyn DiracMesh) {
        let mut locator = (self.locator_builder)(mesh, &*self.comm);
        // We may be querying points that are not in the local part of the mesh
        locator.enable_out_of_mesh_mode();
        self.locator_builds += 1;
        self.locator = Some(locator);
    }

    /// Updates the point locator after the mesh has changed.
    ///
    /// **Collective**: must be called on every partition, including partitions without any
    /// registered points. The locator is rebuilt only if some partition has registered
    /// points; otherwise the stale locator is discarded, and a new one is built lazily by the
    /// next [`find_owning_element`](Self::find_owning_element).
    pub fn notify_mesh_changed(&mut self, mesh: &dyn DiracMesh) {
        let needs_rebuild = self.comm.max_usize(self.store.elements_with_points().len()) > 0;
        if needs_rebuild {
            log::debug!("Mesh changed, rebuilding Dirac point locator");
            self.build_locator(mesh);
        } else {
            self.locator = None;
        }
    }

    /// Decides whether the local partition owns a point, given the element in which the
    /// local partition located it.
    ///
    /// **Collective**: the element with the smallest index over all partitions wins, and
    /// all other partitions must treat the point as not found.
    pub fn resolve_ownership(&self, candidate: Option<usize>) -> bool {
        self.resolve_point_ownership(candidate).is_local()
    }

    /// Like [`resolve_ownership`](Self::resolve_ownership), but also distinguishes a point
    /// owned by another partition from a point that no partition found.
    ///
    /// **Collective**.
    pub fn resolve_point_ownership(&self, candidate: Option<usize>) -> PointOwnership {
        let local_id = candidate.unwrap_or(usize::MAX);
        let min_id = self.comm.min_usize(local_id);
        match candidate {
            _ if min_id == usize::MAX => PointOwnership::NotFound,
            Some(element) if element == min_id => PointOwnership::Local(element),
            _ => PointOwnership::Remote,
        }
    }

    /// Locates `point` and resolves its ownership across partitions.
    ///
    /// Builds the locator if none exists. Lazy construction is only safe here because
    /// every contributor calls this for the same points on every partition, which makes the
    /// construction collective.
    ///
    /// **Collective**.
    pub fn locate_point(
        &mut self,
        point: &PhysicalPoint,
        mesh: &dyn DiracMesh,
        allowed_subdomains: Option<&BTreeSet<SubdomainId>>,
    ) -> Result<PointOwnership, DiracError> {
        if self.locator.is_none() {
            self.build_locator(mesh);
        }
        let located = match self.locator.as_deref() {
            Some(locator) => locator.locate(mesh, point, allowed_subdomains),
            None => Ok(None),
        };
        // Do not bail out before the reduction, otherwise the other partitions hang
        let (candidate, error) = match located {
            Ok(candidate) => (candidate, None),
            Err(err) => (None, Some(err)),
        };
        let ownership = self.resolve_point_ownership(candidate);
        match error {
            Some(err) => Err(err),
            None => Ok(ownership),
        }
    }

    /// Returns the element containing `point` if the local partition owns it.
    ///
    /// Points outside the mesh are not an error, they are simply not found.
    ///
    /// **Collective**.
    pub fn find_owning_element(
        &mut self,
        point: &PhysicalPoint,
        mesh: &dyn DiracMesh,
        allowed_subdomains: Option<&BTreeSet<SubdomainId>>,
    ) -> Result<Option<usize>, DiracError> {
        Ok(self
            .locate_point(point, mesh, allowed_subdomains)?
            .local_element())
    }
}
