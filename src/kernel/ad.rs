use crate::dof::{DofMap, VariableId};
use crate::dual::DualNumber;
use crate::error::DiracError;
use crate::evaluation::{AdQpContext, DofLayout};
use crate::kernel::{DiracContributor, DiracKernelParameters, DiracKernelState, ElementContext, PointCollector};
use crate::material::MaterialPropertyRequest;
use crate::nalgebra::DMatrix;
use std::iter::once;

/// A point contribution whose derivatives are obtained by automatic differentiation.
pub trait AdPointContribution: Send {
    fn material_properties(&self) -> Vec<MaterialPropertyRequest> {
        Vec::new()
    }

    fn add_points(&mut self, points: &mut PointCollector, time: f64) -> Result<(), DiracError>;

    /// The residual for test function `i`, as a function of the element DOFs.
    fn compute_qp_residual(&self, i: usize, qp: &AdQpContext) -> DualNumber;
}

/// A Dirac kernel whose Jacobian is computed from an [`AdPointContribution`].
///
/// The derivatives of the residual with respect to all DOFs of the kernel's variables are
/// computed once per element. The diagonal and every off-diagonal block are then sliced out of
/// this full element Jacobian.
#[derive(Debug)]
pub struct AdDiracKernel<K> {
    state: DiracKernelState,
    kernel: K,
    layout: DofLayout,
    full_jacobian: DMatrix<f64>,
    full_jacobian_element: Option<usize>,
    full_jacobian_evaluations: usize,
}

impl<K: AdPointContribution> AdDiracKernel<K> {
    pub fn new(params: &DiracKernelParameters, dof_map: &dyn DofMap, kernel: K) -> Result<Self, DiracError> {
        let mut state = DiracKernelState::new(params, dof_map)?;
        for request in kernel.material_properties() {
            state.request_material(&request)?;
        }
        Ok(Self {
            state,
            kernel,
            layout: DofLayout::default(),
            full_jacobian: DMatrix::zeros(0, 0),
            full_jacobian_element: None,
            full_jacobian_evaluations: 0,
        })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Number of times the full element Jacobian has been computed.
    pub fn full_jacobian_evaluations(&self) -> usize {
        self.full_jacobian_evaluations
    }

    fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        once(self.state.variable()).chain(self.state.coupled_variables().iter().copied())
    }

    fn compute_full_jacobian(&mut self, element: &ElementContext) {
        if self.full_jacobian_element == Some(element.element()) {
            return;
        }

        let variable = self.state.variable();
        let evaluation = element.evaluation();
        self.layout = DofLayout::from_evaluation(evaluation, self.variables());
        let n = evaluation.num_dofs(variable);
        self.full_jacobian = DMatrix::zeros(n, self.layout.total());
        for (qp, weight) in element.active_points(&self.state) {
            let context = AdQpContext::new(element.qp(qp, variable), &self.layout);
            for i in 0..n {
                let residual = self.kernel.compute_qp_residual(i, &context);
                // Residuals without derivatives are constant in the DOFs
                if !residual.derivatives().is_empty() {
                    let mut row = self.full_jacobian.row_mut(i);
                    row += weight * residual.derivatives().transpose();
                }
            }
        }

        self.full_jacobian_element = Some(element.element());
        self.full_jacobian_evaluations += 1;
    }

    fn copy_block(&mut self, element: &ElementContext, jvar: VariableId) {
        let rows = self.full_jacobian.nrows();
        match self.layout.block(jvar) {
            Some((offset, count)) => {
                let block = self.full_jacobian.columns(offset, count);
                self.state
                    .prepare_local_jacobian(rows, count)
                    .copy_from(&block);
            }
            // The residual does not depend on jvar
            None => {
                let count = element.evaluation().num_dofs(jvar);
                self.state.prepare_local_jacobian(rows, count);
            }
        }
    }
}

impl<K: AdPointContribution> DiracContributor for AdDiracKernel<K> {
    fn state(&self) -> &DiracKernelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DiracKernelState {
        &mut self.state
    }

    fn add_points(&mut self, points: &mut PointCollector, time: f64) -> Result<(), DiracError> {
        self.kernel.add_points(points, time)
    }

    fn jacobian_setup(&mut self) {
        self.full_jacobian_element = None;
    }

    fn compute_residual(&mut self, element: &ElementContext) {
        let variable = self.state.variable();
        let evaluation = element.evaluation();
        let layout = DofLayout::from_evaluation(evaluation, self.variables());
        let n = evaluation.num_dofs(variable);
        let active: Vec<_> = element.active_points(&self.state).collect();
        let residual = self.state.prepare_local_residual(n);
        for (qp, weight) in active {
            let context = AdQpContext::new(element.qp(qp, variable), &layout);
            for i in 0..n {
                residual[i] += weight * self.kernel.compute_qp_residual(i, &context).value();
            }
        }
    }

    fn compute_jacobian(&mut self, element: &ElementContext) {
        self.compute_full_jacobian(element);
        let variable = self.state.variable();
        self.copy_block(element, variable);
    }

    fn compute_off_diag_jacobian(&mut self, element: &ElementContext, jvar: VariableId) {
        self.compute_full_jacobian(element);
        self.copy_block(element, jvar);
    }
}
