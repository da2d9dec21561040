//! The element loop over elements with Dirac points.
use crate::assembly::{GlobalSystem, TagSelection};
use crate::dof::{DofMap, VariableId};
use crate::error::DiracError;
use crate::evaluation::ElementPointEvaluation;
use crate::kernel::{DiracContributor, ElementContext};
use crate::material::MaterialStore;
use crate::mesh::{DiracMesh, SubdomainId};
use crate::nalgebra::DVector;
use crate::registry::PointRegistry;
use std::collections::BTreeSet;

/// Which quantity an element loop assembles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EvaluationKind {
    Residual,
    Jacobian,
}

/// Counters collected during one element loop.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DriverStatistics {
    pub elements_visited: usize,
    pub material_reinits: usize,
}

/// Computes Dirac contributions on every element with registered points.
///
/// The loop runs on a single worker. Elements are visited in increasing order; whenever the
/// subdomain changes, the contributors active on the new subdomain and the variables they need
/// are recomputed.
pub struct ComputeDirac<'a> {
    mesh: &'a dyn DiracMesh,
    dof_map: &'a dyn DofMap,
    solution: &'a DVector<f64>,
    system: &'a GlobalSystem,
    time: f64,
    kind: EvaluationKind,
    tags: TagSelection,
    coupling_pairs: Vec<(VariableId, VariableId)>,
    subdomain: Option<SubdomainId>,
    active: Vec<usize>,
    needed_variables: BTreeSet<VariableId>,
    evaluation: ElementPointEvaluation,
    statistics: DriverStatistics,
}

impl<'a> ComputeDirac<'a> {
    pub fn new(
        mesh: &'a dyn DiracMesh,
        dof_map: &'a dyn DofMap,
        solution: &'a DVector<f64>,
        system: &'a GlobalSystem,
        kind: EvaluationKind,
        tags: TagSelection,
    ) -> Self {
        Self {
            mesh,
            dof_map,
            solution,
            system,
            time: 0.0,
            kind,
            tags,
            coupling_pairs: dof_map.coupling_pairs(),
            subdomain: None,
            active: Vec::new(),
            needed_variables: BTreeSet::new(),
            evaluation: ElementPointEvaluation::default(),
            statistics: DriverStatistics::default(),
        }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Runs the loop over all elements with points in `registry`.
    ///
    /// `materials` is only required if some contributor requested material properties.
    pub fn run(
        mut self,
        registry: &PointRegistry,
        contributors: &mut [Box<dyn DiracContributor>],
        mut materials: Option<&mut (dyn MaterialStore + '_)>,
    ) -> Result<DriverStatistics, DiracError> {
        self.init(contributors);
        let result = registry
            .elements_with_points()
            .iter()
            .try_for_each(|&element| self.on_element(element, registry, contributors, materials.as_deref_mut()));
        self.finalize(materials);
        result.map(|_| self.statistics)
    }

    fn init(&mut self, contributors: &mut [Box<dyn DiracContributor>]) {
        for contributor in contributors.iter_mut() {
            match self.kind {
                EvaluationKind::Residual => contributor.residual_setup(),
                EvaluationKind::Jacobian => contributor.jacobian_setup(),
            }
        }
        self.subdomain = None;
    }

    fn is_selected(&self, contributor: &dyn DiracContributor, subdomain: SubdomainId) -> bool {
        let state = contributor.state();
        let tags = match self.kind {
            EvaluationKind::Residual => state.vector_tags(),
            EvaluationKind::Jacobian => state.matrix_tags(),
        };
        self.tags.selects(tags)
            && state.is_active_on_subdomain(subdomain)
            && self
                .dof_map
                .is_active_on_subdomain(state.variable(), subdomain)
    }

    fn subdomain_setup(&mut self, subdomain: SubdomainId, contributors: &[Box<dyn DiracContributor>]) {
        self.active = (0..contributors.len())
            .filter(|&index| self.is_selected(contributors[index].as_ref(), subdomain))
            .collect();

        self.needed_variables.clear();
        for &index in &self.active {
            let state = contributors[index].state();
            self.needed_variables.insert(state.variable());
            self.needed_variables
                .extend(state.coupled_variables().iter().copied());
            if self.kind == EvaluationKind::Jacobian {
                self.needed_variables.extend(
                    self.coupling_pairs
                        .iter()
                        .filter(|(ivar, _)| *ivar == state.variable())
                        .map(|&(_, jvar)| jvar),
                );
            }
        }
        let dof_map = self.dof_map;
        self.needed_variables
            .retain(|&var| dof_map.is_active_on_subdomain(var, subdomain));

        log::trace!(
            "Subdomain {}: {} active Dirac contributors, {} needed variables",
            subdomain,
            self.active.len(),
            self.needed_variables.len()
        );
        self.subdomain = Some(subdomain);
    }

    fn on_element(
        &mut self,
        element: usize,
        registry: &PointRegistry,
        contributors: &mut [Box<dyn DiracContributor>],
        materials: Option<&mut (dyn MaterialStore + '_)>,
    ) -> Result<(), DiracError> {
        let subdomain = self.mesh.element_subdomain(element);
        if self.subdomain != Some(subdomain) {
            self.subdomain_setup(subdomain, contributors);
        }

        let with_points: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&index| contributors[index].state().has_points_on(element))
            .collect();
        if with_points.is_empty() {
            log::trace!("Skipping element {}: no active contributor has points on it", element);
            return Ok(());
        }

        let points = registry.points_on(element).points();
        let needs_materials = with_points
            .iter()
            .any(|&index| contributors[index].state().material_requests().has_requests());
        let materials: Option<&dyn MaterialStore> = if needs_materials {
            let store = materials.ok_or_else(|| DiracError::Evaluation {
                element,
                message: "material properties were requested, but no material store was provided".to_string(),
            })?;
            store.reinit_at_points(element, subdomain, points)?;
            self.statistics.material_reinits += 1;
            Some(&*store)
        } else {
            None
        };

        self.evaluation.reinit(
            self.mesh,
            self.dof_map,
            element,
            points,
            self.solution,
            &self.needed_variables,
        )?;
        self.statistics.elements_visited += 1;
        log::trace!(
            "Element {}: {} points, {} contributors",
            element,
            points.len(),
            with_points.len()
        );

        let context = ElementContext::new(&self.evaluation, self.time, materials);
        for index in with_points {
            let contributor = contributors[index].as_mut();
            let variable = contributor.state().variable();
            let row_dofs = match self.evaluation.variable(variable) {
                Some(data) => data.dofs(),
                None => continue,
            };

            match self.kind {
                EvaluationKind::Residual => {
                    contributor.compute_residual(&context);
                    let state = contributor.state();
                    self.system
                        .add_residual(self.tags.filter(state.vector_tags()), row_dofs, state.local_residual());
                }
                EvaluationKind::Jacobian => {
                    contributor.compute_jacobian(&context);
                    let state = contributor.state();
                    self.system.add_jacobian(
                        self.tags.filter(state.matrix_tags()),
                        row_dofs,
                        row_dofs,
                        state.local_jacobian(),
                    );

                    for &(ivar, jvar) in &self.coupling_pairs {
                        if ivar != variable || jvar == variable || !self.dof_map.is_active_on_subdomain(jvar, subdomain)
                        {
                            continue;
                        }
                        let col_dofs = match self.evaluation.variable(jvar) {
                            Some(data) if !data.dofs().is_empty() => data.dofs(),
                            _ => continue,
                        };
                        contributor.compute_off_diag_jacobian(&context, jvar);
                        let state = contributor.state();
                        self.system.add_jacobian(
                            self.tags.filter(state.matrix_tags()),
                            row_dofs,
                            col_dofs,
                            state.local_jacobian(),
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn finalize(&mut self, materials: Option<&mut (dyn MaterialStore + '_)>) {
        if let Some(store) = materials {
            store.clear_active();
        }
        self.active.clear();
        self.needed_variables.clear();
        self.subdomain = None;
        log::trace!(
            "Dirac element loop finished: {} elements, {} material reinits",
            self.statistics.elements_visited,
            self.statistics.material_reinits
        );
    }
}
