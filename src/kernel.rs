//! Dirac kernels: contributors of point loads and point sinks.
//!
//! A contributor takes part in every evaluation in two phases. First it produces the points at
//! which it acts into a [`PointCollector`]. These points are located in the mesh, resolved to a
//! single owning partition and registered both in the [`PointRegistry`] shared by all
//! contributors and in the contributor's own [`PointStore`]. Then, for every element with
//! registered points, the [driver](crate::driver::ComputeDirac) asks the contributor for its
//! local residual and Jacobian at those points.
//!
//! Two strategies are provided for computing the local Jacobian:
//!
//! - [`DiracKernel`] wraps a [`ManualPointContribution`], which provides hand-written
//!   derivatives.
//! - [`AdDiracKernel`] wraps an [`AdPointContribution`], which only provides a residual in terms
//!   of [`DualNumber`](crate::dual::DualNumber)s; the Jacobian is obtained by automatic
//!   differentiation.
use crate::assembly::TagId;
use crate::dof::{DofMap, VariableId};
use crate::error::DiracError;
use crate::evaluation::{ElementPointEvaluation, QpContext};
use crate::material::{MaterialPropertyRequest, MaterialRequests, MaterialStore};
use crate::mesh::{DiracMesh, SubdomainId};
use crate::nalgebra::{DMatrix, DVector};
use crate::point::{same_location, PhysicalPoint};
use crate::registry::{PointOwnership, PointRegistry, PointStore};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

mod ad;
mod manual;
pub mod sources;

pub use ad::*;
pub use manual::*;

/// What to do when no partition finds an element containing a point.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PointNotFoundBehavior {
    /// Abort the evaluation with [`DiracError::PointNotFound`].
    #[default]
    Error,
    /// Log a warning and drop the point for this evaluation.
    Warning,
    /// Silently drop the point.
    Ignore,
}

impl PointNotFoundBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for PointNotFoundBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointNotFoundBehavior {
    type Err = DiracError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Self::Error),
            "WARNING" => Ok(Self::Warning),
            "IGNORE" => Ok(Self::Ignore),
            _ => Err(DiracError::InvalidParameter {
                parameter: "point_not_found_behavior".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PointNotFoundBehavior {
    type Error = DiracError;

    fn try_from(value: String) -> Result<Self, DiracError> {
        value.parse()
    }
}

impl From<PointNotFoundBehavior> for String {
    fn from(behavior: PointNotFoundBehavior) -> Self {
        behavior.as_str().to_string()
    }
}

fn default_tags() -> BTreeSet<TagId> {
    [TagId::SYSTEM].into_iter().collect()
}

/// Parameters common to all Dirac kernels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiracKernelParameters {
    /// Name of the kernel, used in diagnostics.
    pub name: String,
    /// The variable whose residual the kernel contributes to.
    pub variable: String,
    #[serde(default)]
    pub coupled_variables: Vec<String>,
    /// Subdomains in which points are located. All subdomains if absent.
    #[serde(default)]
    pub block: Option<BTreeSet<SubdomainId>>,
    #[serde(default = "default_tags")]
    pub vector_tags: BTreeSet<TagId>,
    #[serde(default = "default_tags")]
    pub matrix_tags: BTreeSet<TagId>,
    /// Contribute only once per location, however many times a location is registered.
    #[serde(default)]
    pub drop_duplicate_points: bool,
    #[serde(default)]
    pub point_not_found_behavior: PointNotFoundBehavior,
}

impl DiracKernelParameters {
    pub fn new(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variable: variable.into(),
            coupled_variables: Vec::new(),
            block: None,
            vector_tags: default_tags(),
            matrix_tags: default_tags(),
            drop_duplicate_points: false,
            point_not_found_behavior: PointNotFoundBehavior::default(),
        }
    }

    pub fn with_coupled_variable(mut self, variable: impl Into<String>) -> Self {
        self.coupled_variables.push(variable.into());
        self
    }

    pub fn with_block(mut self, blocks: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.block = Some(blocks.into_iter().collect());
        self
    }

    pub fn with_vector_tags(mut self, tags: impl IntoIterator<Item = TagId>) -> Self {
        self.vector_tags = tags.into_iter().collect();
        self
    }

    pub fn with_matrix_tags(mut self, tags: impl IntoIterator<Item = TagId>) -> Self {
        self.matrix_tags = tags.into_iter().collect();
        self
    }

    pub fn with_drop_duplicate_points(mut self, drop_duplicate_points: bool) -> Self {
        self.drop_duplicate_points = drop_duplicate_points;
        self
    }

    pub fn with_point_not_found_behavior(mut self, behavior: PointNotFoundBehavior) -> Self {
        self.point_not_found_behavior = behavior;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PointRequest {
    point: PhysicalPoint,
    id: Option<u64>,
}

/// Receives the points a contributor acts on during an evaluation.
#[derive(Debug, Clone, Default)]
pub struct PointCollector {
    requests: Vec<PointRequest>,
}

impl PointCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: PhysicalPoint) {
        self.requests.push(PointRequest { point, id: None });
    }

    /// Adds a point tagged with a stable id.
    ///
    /// As long as a point with the same id is added at the same location in subsequent
    /// evaluations, and the mesh does not change, the point is not located again.
    pub fn add_point_with_id(&mut self, point: PhysicalPoint, id: u64) {
        self.requests.push(PointRequest { point, id: Some(id) });
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &PhysicalPoint> {
        self.requests.iter().map(|request| &request.point)
    }
}

/// A point that was dropped because no partition found it, under
/// [`PointNotFoundBehavior::Warning`].
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedPoint {
    pub contributor: String,
    pub point: PhysicalPoint,
}

/// Outcome of registering the points of one contributor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointRegistration {
    /// Points registered on the local partition.
    pub registered: usize,
    pub dropped: Vec<DroppedPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedPoint {
    point: PhysicalPoint,
    ownership: PointOwnership,
}

/// State shared by all Dirac kernels, independent of how their contributions are computed.
#[derive(Debug, Clone)]
pub struct DiracKernelState {
    name: String,
    variable: VariableId,
    coupled_variables: Vec<VariableId>,
    blocks: Option<BTreeSet<SubdomainId>>,
    vector_tags: BTreeSet<TagId>,
    matrix_tags: BTreeSet<TagId>,
    drop_duplicate_points: bool,
    point_not_found_behavior: PointNotFoundBehavior,
    local_points: PointStore,
    /// Per element, how many of the kernel's points were merged into each entry of the
    /// shared registry.
    registry_entries: BTreeMap<usize, Vec<usize>>,
    point_cache: FxHashMap<u64, CachedPoint>,
    material_requests: MaterialRequests,
    local_residual: DVector<f64>,
    local_jacobian: DMatrix<f64>,
}

impl DiracKernelState {
    /// Validates `params` and resolves variable names against `dof_map`.
    pub fn new(params: &DiracKernelParameters, dof_map: &dyn DofMap) -> Result<Self, DiracError> {
        if params.variable.is_empty() {
            return Err(DiracError::configuration(&params.name, "the variable name must not be empty"));
        }
        let variable = dof_map.variable_id(&params.variable)?;
        let coupled_variables = params
            .coupled_variables
            .iter()
            .map(|name| dof_map.variable_id(name))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(blocks) = &params.block {
            if blocks.is_empty() {
                return Err(DiracError::configuration(&params.name, "the block restriction must not be empty"));
            }
        }

        Ok(Self {
            name: params.name.clone(),
            variable,
            coupled_variables,
            blocks: params.block.clone(),
            vector_tags: params.vector_tags.clone(),
            matrix_tags: params.matrix_tags.clone(),
            drop_duplicate_points: params.drop_duplicate_points,
            point_not_found_behavior: params.point_not_found_behavior,
            local_points: PointStore::new(),
            registry_entries: BTreeMap::new(),
            point_cache: FxHashMap::default(),
            material_requests: MaterialRequests::default(),
            local_residual: DVector::zeros(0),
            local_jacobian: DMatrix::zeros(0, 0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variable(&self) -> VariableId {
        self.variable
    }

    pub fn coupled_variables(&self) -> &[VariableId] {
        &self.coupled_variables
    }

    pub fn blocks(&self) -> Option<&BTreeSet<SubdomainId>> {
        self.blocks.as_ref()
    }

    pub fn vector_tags(&self) -> &BTreeSet<TagId> {
        &self.vector_tags
    }

    pub fn matrix_tags(&self) -> &BTreeSet<TagId> {
        &self.matrix_tags
    }

    pub fn drop_duplicate_points(&self) -> bool {
        self.drop_duplicate_points
    }

    pub fn point_not_found_behavior(&self) -> PointNotFoundBehavior {
        self.point_not_found_behavior
    }

    pub fn is_active_on_subdomain(&self, subdomain: SubdomainId) -> bool {
        self.blocks
            .as_ref()
            .map(|blocks| blocks.contains(&subdomain))
            .unwrap_or(true)
    }

    /// Records a material property request. Stateful properties are rejected.
    pub fn request_material(&mut self, request: &MaterialPropertyRequest) -> Result<(), DiracError> {
        self.material_requests.request(&self.name, request)
    }

    pub fn material_requests(&self) -> &MaterialRequests {
        &self.material_requests
    }

    /// The points registered by this kernel alone.
    pub fn local_points(&self) -> &PointStore {
        &self.local_points
    }

    pub fn has_points_on(&self, element: usize) -> bool {
        self.local_points.has_points_on(element)
    }

    /// Whether this kernel registered a point at the location of `point` on `element`.
    pub fn is_active_at_point(&self, element: usize, point: &PhysicalPoint) -> bool {
        self.local_points.has_point(element, point)
    }

    /// The factor by which the contribution at `point` is scaled, or `None` if the kernel
    /// does not act at `point`.
    pub fn point_weight(&self, element: usize, point: &PhysicalPoint) -> Option<f64> {
        let multiplicity = self.local_points.multiplicity(element, point)?;
        if self.drop_duplicate_points {
            Some(1.0)
        } else {
            Some(multiplicity as f64)
        }
    }

    /// The entries of the shared registry on `element` at which the kernel acts, with their
    /// weights.
    ///
    /// Each point of the kernel counts toward the registry entry it was merged into, so a
    /// point within tolerance of several entries contributes only once.
    pub fn registry_entry_weights(&self, element: usize) -> impl '_ + Iterator<Item = (usize, f64)> {
        self.registry_entries
            .get(&element)
            .into_iter()
            .flat_map(|counts| counts.iter().enumerate())
            .filter(|&(_, &count)| count > 0)
            .map(move |(entry, &count)| {
                let weight = if self.drop_duplicate_points { 1.0 } else { count as f64 };
                (entry, weight)
            })
    }

    pub fn clear_points(&mut self) {
        self.local_points.clear_points();
        self.registry_entries.clear();
    }

    pub fn clear_point_cache(&mut self) {
        self.point_cache.clear();
    }

    pub fn num_cached_points(&self) -> usize {
        self.point_cache.len()
    }

    pub fn local_residual(&self) -> &DVector<f64> {
        &self.local_residual
    }

    pub fn local_jacobian(&self) -> &DMatrix<f64> {
        &self.local_jacobian
    }

    /// Resizes the local residual to `n` entries and zeroes it.
    pub fn prepare_local_residual(&mut self, n: usize) -> &mut DVector<f64> {
        if self.local_residual.len() != n {
            self.local_residual = DVector::zeros(n);
        } else {
            self.local_residual.fill(0.0);
        }
        &mut self.local_residual
    }

    /// Resizes the local Jacobian block to `rows x cols` and zeroes it.
    pub fn prepare_local_jacobian(&mut self, rows: usize, cols: usize) -> &mut DMatrix<f64> {
        self.local_jacobian.resize_mut(rows, cols, 0.0);
        self.local_jacobian.fill(0.0);
        &mut self.local_jacobian
    }

    /// Locates, resolves and registers the collected points.
    ///
    /// **Collective**: every partition must register the same points in the same order.
    pub fn register_points(
        &mut self,
        collector: PointCollector,
        registry: &mut PointRegistry,
        mesh: &dyn DiracMesh,
    ) -> Result<PointRegistration, DiracError> {
        let mut registration = PointRegistration::default();
        self.validate_point_cache(&collector.requests, registry, mesh);
        for PointRequest { point, id } in collector.requests {
            let ownership = match id {
                Some(id) => self.locate_cached(id, &point, registry, mesh)?,
                None => registry.locate_point(&point, mesh, self.blocks.as_ref())?,
            };

            match ownership {
                PointOwnership::Local(element) => {
                    let entry = registry.add_point(element, &point);
                    let counts = self.registry_entries.entry(element).or_default();
                    if counts.len() <= entry {
                        counts.resize(entry + 1, 0);
                    }
                    counts[entry] += 1;
                    self.local_points.add_point(element, &point);
                    registration.registered += 1;
                }
                PointOwnership::Remote => {}
                PointOwnership::NotFound => match self.point_not_found_behavior {
                    PointNotFoundBehavior::Error => {
                        return Err(DiracError::PointNotFound {
                            contributor: self.name.clone(),
                            point,
                            blocks: self.blocks.clone(),
                        })
                    }
                    PointNotFoundBehavior::Warning => {
                        log::warn!("Point {} of Dirac kernel '{}' was not found in the mesh", point, self.name);
                        registration.dropped.push(DroppedPoint {
                            contributor: self.name.clone(),
                            point,
                        });
                    }
                    PointNotFoundBehavior::Ignore => {}
                },
            }
        }
        Ok(registration)
    }

    /// Drops the point cache on every partition if some partition finds that a cached
    /// element no longer contains its point, which happens when the mesh moved without
    /// [`PointRegistry::notify_mesh_changed`].
    ///
    /// **Collective**. Whether a request hits the cache depends only on ids and locations,
    /// which are the same on every partition.
    fn validate_point_cache(&mut self, requests: &[PointRequest], registry: &mut PointRegistry, mesh: &dyn DiracMesh) {
        let mut any_hit = false;
        let mut stale = false;
        for request in requests {
            let cached = request
                .id
                .and_then(|id| self.point_cache.get(&id))
                .filter(|cached| same_location(&cached.point, &request.point));
            if let Some(cached) = cached {
                any_hit = true;
                if let PointOwnership::Local(element) = cached.ownership {
                    stale |= element >= mesh.num_elements() || !mesh.element_contains_point(element, &request.point);
                }
            }
        }

        if any_hit && registry.communicator().max_usize(stale as usize) > 0 {
            log::debug!(
                "Cached point locations of Dirac kernel '{}' are stale, locating points again",
                self.name
            );
            self.point_cache.clear();
            registry.notify_mesh_changed(mesh);
        }
    }

    fn locate_cached(
        &mut self,
        id: u64,
        point: &PhysicalPoint,
        registry: &mut PointRegistry,
        mesh: &dyn DiracMesh,
    ) -> Result<PointOwnership, DiracError> {
        if let Some(cached) = self.point_cache.get(&id) {
            if same_location(&cached.point, point) {
                return Ok(cached.ownership);
            }
        }

        let ownership = registry.locate_point(point, mesh, self.blocks.as_ref())?;
        // Unresolved points go through the not-found policy again on every evaluation
        if ownership == PointOwnership::NotFound {
            self.point_cache.remove(&id);
        } else {
            self.point_cache.insert(
                id,
                CachedPoint {
                    point: *point,
                    ownership,
                },
            );
        }
        Ok(ownership)
    }
}

/// Data of the current element handed to contributors by the driver.
#[derive(Clone, Copy)]
pub struct ElementContext<'a> {
    evaluation: &'a ElementPointEvaluation,
    time: f64,
    materials: Option<&'a dyn MaterialStore>,
}

impl<'a> ElementContext<'a> {
    pub fn new(evaluation: &'a ElementPointEvaluation, time: f64, materials: Option<&'a dyn MaterialStore>) -> Self {
        Self {
            evaluation,
            time,
            materials,
        }
    }

    pub fn evaluation(&self) -> &'a ElementPointEvaluation {
        self.evaluation
    }

    pub fn element(&self) -> usize {
        self.evaluation.element()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// The context of point `qp` for a kernel acting on `variable`.
    pub fn qp(&self, qp: usize, variable: VariableId) -> QpContext<'a> {
        QpContext::new(self.evaluation, qp, variable, self.time, self.materials)
    }

    /// The points of the element at which `state`'s kernel is active, with their weights.
    pub fn active_points<'s>(&'s self, state: &'s DiracKernelState) -> impl 's + Iterator<Item = (usize, f64)> {
        let num_points = self.evaluation.points().len();
        state
            .registry_entry_weights(self.element())
            .filter(move |&(qp, _)| qp < num_points)
    }
}

/// A contributor of point loads to the residual and Jacobian.
///
/// Local contributions are written into the buffers of [`DiracKernelState`]; the driver
/// appends them to the global system.
pub trait DiracContributor: Send {
    fn state(&self) -> &DiracKernelState;

    fn state_mut(&mut self) -> &mut DiracKernelState;

    fn name(&self) -> &str {
        self.state().name()
    }

    /// Produces the points at which the contributor acts at time `time`.
    fn add_points(&mut self, points: &mut PointCollector, time: f64) -> Result<(), DiracError>;

    /// Called once before every residual evaluation.
    fn residual_setup(&mut self) {}

    /// Called once before every Jacobian evaluation.
    fn jacobian_setup(&mut self) {}

    /// Fills the local residual of the contributor's variable on the current element.
    fn compute_residual(&mut self, element: &ElementContext);

    /// Fills the local diagonal Jacobian block.
    fn compute_jacobian(&mut self, element: &ElementContext);

    /// Fills the local Jacobian block coupling the contributor's variable to `jvar`.
    fn compute_off_diag_jacobian(&mut self, element: &ElementContext, jvar: VariableId);
}
