use crate::dof::{DofMap, VariableId};
use crate::error::DiracError;
use crate::evaluation::QpContext;
use crate::kernel::{DiracContributor, DiracKernelParameters, DiracKernelState, ElementContext, PointCollector};
use crate::material::MaterialPropertyRequest;

/// A point contribution with hand-written derivatives.
///
/// `i` indexes test functions and `j` trial functions of the element.
pub trait ManualPointContribution: Send {
    /// Material properties needed by the kernel. Requested once, at construction.
    fn material_properties(&self) -> Vec<MaterialPropertyRequest> {
        Vec::new()
    }

    fn add_points(&mut self, points: &mut PointCollector, time: f64) -> Result<(), DiracError>;

    fn compute_qp_residual(&self, i: usize, qp: &QpContext) -> f64;

    fn compute_qp_jacobian(&self, _i: usize, _j: usize, _qp: &QpContext) -> f64 {
        0.0
    }

    fn compute_qp_off_diag_jacobian(&self, _i: usize, _j: usize, _jvar: VariableId, _qp: &QpContext) -> f64 {
        0.0
    }
}

/// A Dirac kernel whose Jacobian is provided by a [`ManualPointContribution`].
#[derive(Debug)]
pub struct DiracKernel<K> {
    state: DiracKernelState,
    kernel: K,
}

impl<K: ManualPointContribution> DiracKernel<K> {
    pub fn new(params: &DiracKernelParameters, dof_map: &dyn DofMap, kernel: K) -> Result<Self, DiracError> {
        let mut state = DiracKernelState::new(params, dof_map)?;
        for request in kernel.material_properties() {
            state.request_material(&request)?;
        }
        Ok(Self { state, kernel })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }
}

impl<K: ManualPointContribution> DiracContributor for DiracKernel<K> {
    fn state(&self) -> &DiracKernelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DiracKernelState {
        &mut self.state
    }

    fn add_points(&mut self, points: &mut PointCollector, time: f64) -> Result<(), DiracError> {
        self.kernel.add_points(points, time)
    }

    fn compute_residual(&mut self, element: &ElementContext) {
        let variable = self.state.variable();
        let n = element.evaluation().num_dofs(variable);
        let active: Vec<_> = element.active_points(&self.state).collect();
        let residual = self.state.prepare_local_residual(n);
        for (qp, weight) in active {
            let context = element.qp(qp, variable);
            for i in 0..n {
                residual[i] += weight * self.kernel.compute_qp_residual(i, &context);
            }
        }
    }

    fn compute_jacobian(&mut self, element: &ElementContext) {
        let variable = self.state.variable();
        let n = element.evaluation().num_dofs(variable);
        let active: Vec<_> = element.active_points(&self.state).collect();
        let jacobian = self.state.prepare_local_jacobian(n, n);
        for (qp, weight) in active {
            let context = element.qp(qp, variable);
            for i in 0..n {
                for j in 0..n {
                    jacobian[(i, j)] += weight * self.kernel.compute_qp_jacobian(i, j, &context);
                }
            }
        }
    }

    fn compute_off_diag_jacobian(&mut self, element: &ElementContext, jvar: VariableId) {
        let variable = self.state.variable();
        if jvar == variable {
            return self.compute_jacobian(element);
        }
        let n = element.evaluation().num_dofs(variable);
        let m = element.evaluation().num_dofs(jvar);
        let active: Vec<_> = element.active_points(&self.state).collect();
        let jacobian = self.state.prepare_local_jacobian(n, m);
        for (qp, weight) in active {
            let context = element.qp(qp, variable);
            for i in 0..n {
                for j in 0..m {
                    jacobian[(i, j)] += weight * self.kernel.compute_qp_off_diag_jacobian(i, j, jvar, &context);
                }
            }
        }
    }
}
