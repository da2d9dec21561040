//! Evaluation of all Dirac contributions of a system.
use crate::assembly::{GlobalSystem, TagId, TagSelection};
use crate::dof::DofMap;
use crate::driver::{ComputeDirac, EvaluationKind};
use crate::kernel::{DiracContributor, DroppedPoint, PointCollector};
use crate::material::MaterialStore;
use crate::mesh::DiracMesh;
use crate::nalgebra::DVector;
use crate::parallel::Communicator;
use crate::registry::PointRegistry;
use eyre::WrapErr;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything an evaluation reads from, and writes to, outside the Dirac subsystem.
pub struct AssemblyContext<'a> {
    mesh: &'a dyn DiracMesh,
    dof_map: &'a dyn DofMap,
    solution: &'a DVector<f64>,
    system: &'a GlobalSystem,
    time: f64,
    materials: Option<&'a mut dyn MaterialStore>,
}

impl<'a> AssemblyContext<'a> {
    pub fn new(
        mesh: &'a dyn DiracMesh,
        dof_map: &'a dyn DofMap,
        solution: &'a DVector<f64>,
        system: &'a GlobalSystem,
    ) -> Self {
        Self {
            mesh,
            dof_map,
            solution,
            system,
            time: 0.0,
            materials: None,
        }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn with_materials(mut self, materials: &'a mut dyn MaterialStore) -> Self {
        self.materials = Some(materials);
        self
    }
}

/// Summary of a single evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Points registered on the local partition, counting duplicates.
    pub registered_points: usize,
    /// Elements of the local partition on which contributions were computed.
    pub elements_visited: usize,
    pub material_reinits: usize,
    /// Points dropped with a warning because no partition found them.
    pub dropped_points: Vec<DroppedPoint>,
}

/// The Dirac contributors of a system together with their shared point registry.
pub struct DiracSystem {
    registry: PointRegistry,
    contributors: Vec<Box<dyn DiracContributor>>,
}

impl DiracSystem {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self::with_registry(PointRegistry::new(comm))
    }

    pub fn with_registry(registry: PointRegistry) -> Self {
        Self {
            registry,
            contributors: Vec::new(),
        }
    }

    pub fn add_contributor(&mut self, contributor: impl DiracContributor + 'static) {
        self.contributors.push(Box::new(contributor));
    }

    pub fn registry(&self) -> &PointRegistry {
        &self.registry
    }

    pub fn contributors(&self) -> &[Box<dyn DiracContributor>] {
        &self.contributors
    }

    pub fn contributors_mut(&mut self) -> &mut [Box<dyn DiracContributor>] {
        &mut self.contributors
    }

    pub fn contributor(&self, name: &str) -> Option<&dyn DiracContributor> {
        self.contributors
            .iter()
            .find(|contributor| contributor.name() == name)
            .map(|contributor| contributor.as_ref())
    }

    /// Must be called whenever the mesh moves or otherwise changes.
    ///
    /// **Collective**.
    pub fn mesh_changed(&mut self, mesh: &dyn DiracMesh) {
        self.registry.notify_mesh_changed(mesh);
        for contributor in &mut self.contributors {
            contributor.state_mut().clear_point_cache();
        }
    }

    /// Adds the Dirac contributions to the residuals with the given tags.
    ///
    /// **Collective**.
    pub fn compute_residual(&mut self, context: &mut AssemblyContext, tags: &BTreeSet<TagId>) -> eyre::Result<EvaluationReport> {
        let selection = TagSelection::from_requested(tags, context.system.vector_tags());
        self.evaluate(context, EvaluationKind::Residual, selection)
    }

    /// Adds the Dirac contributions to the Jacobians with the given tags.
    ///
    /// **Collective**.
    pub fn compute_jacobian(&mut self, context: &mut AssemblyContext, tags: &BTreeSet<TagId>) -> eyre::Result<EvaluationReport> {
        let selection = TagSelection::from_requested(tags, context.system.matrix_tags());
        self.evaluate(context, EvaluationKind::Jacobian, selection)
    }

    /// Clears all points, then lets every contributor register its points again.
    ///
    /// **Collective**.
    pub fn register_points(&mut self, mesh: &dyn DiracMesh, time: f64) -> eyre::Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        self.registry.clear_points();
        for contributor in &mut self.contributors {
            contributor.state_mut().clear_points();
            let mut collector = PointCollector::new();
            contributor
                .add_points(&mut collector, time)
                .wrap_err_with(|| format!("failed to add points of Dirac kernel '{}'", contributor.name()))?;
            let registration = contributor
                .state_mut()
                .register_points(collector, &mut self.registry, mesh)
                .wrap_err_with(|| format!("failed to register points of Dirac kernel '{}'", contributor.name()))?;
            report.registered_points += registration.registered;
            report.dropped_points.extend(registration.dropped);
        }
        log::debug!(
            "Registered {} Dirac points on {} elements",
            report.registered_points,
            self.registry.elements_with_points().len()
        );
        Ok(report)
    }

    fn evaluate(
        &mut self,
        context: &mut AssemblyContext,
        kind: EvaluationKind,
        tags: TagSelection,
    ) -> eyre::Result<EvaluationReport> {
        let mut report = self.register_points(context.mesh, context.time)?;
        let statistics = ComputeDirac::new(
            context.mesh,
            context.dof_map,
            context.solution,
            context.system,
            kind,
            tags,
        )
        .with_time(context.time)
        .run(&self.registry, &mut self.contributors, context.materials.as_deref_mut())
        .wrap_err("failed to compute Dirac contributions")?;
        report.elements_visited = statistics.elements_visited;
        report.material_reinits = statistics.material_reinits;
        Ok(report)
    }
}
