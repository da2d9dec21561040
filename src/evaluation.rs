//! Finite element data evaluated at the Dirac points of an element.
//!
//! Dirac points play the role of quadrature points: the registered points of an element are
//! its "quadrature rule", each with unit weight. [`ElementPointEvaluation`] holds basis values,
//! basis gradients and variable values at those points, and kernels read them through
//! [`QpContext`] (or [`AdQpContext`] for automatic differentiation).
use crate::dof::{DofMap, VariableId};
use crate::dual::DualNumber;
use crate::element::ReferencePoint;
use crate::error::DiracError;
use crate::material::MaterialStore;
use crate::mesh::{DiracMesh, SubdomainId};
use crate::nalgebra::{DMatrix, DVector, Vector3};
use crate::point::PhysicalPoint;
use std::collections::{BTreeMap, BTreeSet};

/// Values of a single variable at the points of an element.
#[derive(Debug, Clone, Default)]
pub struct VariableAtPoints {
    dofs: Vec<usize>,
    values: Vec<f64>,
    gradients: Vec<Vector3<f64>>,
}

impl VariableAtPoints {
    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn gradients(&self) -> &[Vector3<f64>] {
        &self.gradients
    }
}

/// Finite element data at the Dirac points of the current element.
///
/// Buffers are reused between elements.
#[derive(Debug, Clone)]
pub struct ElementPointEvaluation {
    element: usize,
    subdomain: SubdomainId,
    points: Vec<PhysicalPoint>,
    reference_points: Vec<ReferencePoint>,
    num_basis: usize,
    // Row q holds the basis values at point q
    basis_values: DMatrix<f64>,
    // Gradient of basis function i at point q is stored at q * num_basis + i
    basis_gradients: Vec<Vector3<f64>>,
    variables: BTreeMap<VariableId, VariableAtPoints>,
    dof_buffer: Vec<usize>,
}

impl Default for ElementPointEvaluation {
    fn default() -> Self {
        Self {
            element: usize::MAX,
            subdomain: 0,
            points: Vec::new(),
            reference_points: Vec::new(),
            num_basis: 0,
            basis_values: DMatrix::zeros(0, 0),
            basis_gradients: Vec::new(),
            variables: BTreeMap::new(),
            dof_buffer: Vec::new(),
        }
    }
}

impl ElementPointEvaluation {
    /// Evaluates basis functions and the given variables at `points` of `element`.
    ///
    /// Only the variables in `variables` are evaluated; values of other variables are not
    /// available afterwards.
    pub fn reinit(
        &mut self,
        mesh: &dyn DiracMesh,
        dof_map: &dyn DofMap,
        element: usize,
        points: &[PhysicalPoint],
        solution: &DVector<f64>,
        variables: &BTreeSet<VariableId>,
    ) -> Result<(), DiracError> {
        let num_basis = mesh.element_nodes(element).len();
        let num_points = points.len();
        self.element = element;
        self.subdomain = mesh.element_subdomain(element);
        self.num_basis = num_basis;
        self.points.clear();
        self.points.extend_from_slice(points);

        self.reference_points.clear();
        for point in points {
            let xi = mesh
                .locate_in_element(element, point)
                .ok_or_else(|| DiracError::Evaluation {
                    element,
                    message: format!("registered point {point} is not inside the element"),
                })?;
            self.reference_points.push(xi);
        }

        self.basis_values.resize_mut(num_points, num_basis, 0.0);
        self.basis_gradients
            .resize(num_points * num_basis, Vector3::zeros());
        let mut phi = vec![0.0; num_basis];
        for (q, xi) in self.reference_points.iter().enumerate() {
            mesh.populate_element_basis(element, xi, &mut phi);
            self.basis_values.row_mut(q).copy_from_slice(&phi);
            let gradients = &mut self.basis_gradients[q * num_basis..(q + 1) * num_basis];
            mesh.populate_element_gradients(element, xi, gradients);
        }

        self.variables.retain(|var, _| variables.contains(var));
        for &variable in variables {
            dof_map.populate_element_dofs(variable, mesh, element, &mut self.dof_buffer);
            if !self.dof_buffer.is_empty() && self.dof_buffer.len() != num_basis {
                return Err(DiracError::Evaluation {
                    element,
                    message: format!(
                        "variable '{}' has {} DOFs on an element with {} basis functions",
                        dof_map.variable_name(variable),
                        self.dof_buffer.len(),
                        num_basis
                    ),
                });
            }
            let data = self.variables.entry(variable).or_default();
            data.dofs.clear();
            data.dofs.extend_from_slice(&self.dof_buffer);
            data.values.clear();
            data.gradients.clear();
            for q in 0..num_points {
                let mut value = 0.0;
                let mut gradient = Vector3::zeros();
                for (i, &dof) in data.dofs.iter().enumerate() {
                    value += self.basis_values[(q, i)] * solution[dof];
                    gradient += self.basis_gradients[q * num_basis + i] * solution[dof];
                }
                data.values.push(value);
                data.gradients.push(gradient);
            }
        }

        Ok(())
    }

    pub fn element(&self) -> usize {
        self.element
    }

    pub fn subdomain(&self) -> SubdomainId {
        self.subdomain
    }

    pub fn points(&self) -> &[PhysicalPoint] {
        &self.points
    }

    pub fn reference_points(&self) -> &[ReferencePoint] {
        &self.reference_points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_basis(&self) -> usize {
        self.num_basis
    }

    pub fn basis_value(&self, qp: usize, i: usize) -> f64 {
        self.basis_values[(qp, i)]
    }

    pub fn basis_gradient(&self, qp: usize, i: usize) -> &Vector3<f64> {
        &self.basis_gradients[qp * self.num_basis + i]
    }

    pub fn variable(&self, variable: VariableId) -> Option<&VariableAtPoints> {
        self.variables.get(&variable)
    }

    /// Number of DOFs of `variable` on the element, zero if it was not evaluated.
    pub fn num_dofs(&self, variable: VariableId) -> usize {
        self.variable(variable).map(|v| v.dofs.len()).unwrap_or(0)
    }
}

/// Data available to a kernel at a single Dirac point.
#[derive(Clone, Copy)]
pub struct QpContext<'a> {
    evaluation: &'a ElementPointEvaluation,
    qp: usize,
    variable: VariableId,
    time: f64,
    materials: Option<&'a dyn MaterialStore>,
}

impl<'a> QpContext<'a> {
    pub fn new(
        evaluation: &'a ElementPointEvaluation,
        qp: usize,
        variable: VariableId,
        time: f64,
        materials: Option<&'a dyn MaterialStore>,
    ) -> Self {
        Self {
            evaluation,
            qp,
            variable,
            time,
            materials,
        }
    }

    /// Index of the point among the registered points of the element.
    pub fn qp(&self) -> usize {
        self.qp
    }

    pub fn point(&self) -> &PhysicalPoint {
        &self.evaluation.points[self.qp]
    }

    pub fn element(&self) -> usize {
        self.evaluation.element
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Value of test function `i` at the point.
    pub fn test(&self, i: usize) -> f64 {
        self.evaluation.basis_value(self.qp, i)
    }

    pub fn grad_test(&self, i: usize) -> &Vector3<f64> {
        self.evaluation.basis_gradient(self.qp, i)
    }

    /// Value of trial function `j` at the point.
    ///
    /// Trial functions of all (first order nodal) variables share the element basis.
    pub fn phi(&self, j: usize) -> f64 {
        self.evaluation.basis_value(self.qp, j)
    }

    pub fn grad_phi(&self, j: usize) -> &Vector3<f64> {
        self.evaluation.basis_gradient(self.qp, j)
    }

    /// The kernel's own variable.
    pub fn variable(&self) -> VariableId {
        self.variable
    }

    /// Value of the kernel's variable at the point.
    pub fn u(&self) -> f64 {
        self.coupled_value(self.variable)
    }

    pub fn grad_u(&self) -> Vector3<f64> {
        self.coupled_gradient(self.variable)
    }

    /// Value of `variable` at the point, zero if it is not defined on the element.
    pub fn coupled_value(&self, variable: VariableId) -> f64 {
        self.evaluation
            .variable(variable)
            .and_then(|v| v.values.get(self.qp).copied())
            .unwrap_or(0.0)
    }

    pub fn coupled_gradient(&self, variable: VariableId) -> Vector3<f64> {
        self.evaluation
            .variable(variable)
            .and_then(|v| v.gradients.get(self.qp).copied())
            .unwrap_or_else(Vector3::zeros)
    }

    /// Value of a material property at the point, if materials were computed for the element.
    pub fn material(&self, name: &str) -> Option<f64> {
        self.materials?.property(name, self.qp)
    }
}

/// Position of each variable's DOFs in the derivative vectors of AD residuals.
///
/// The kernel's own variable comes first, followed by its coupled variables in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DofLayout {
    blocks: Vec<(VariableId, usize, usize)>,
    total: usize,
}

impl DofLayout {
    pub fn from_evaluation(evaluation: &ElementPointEvaluation, variables: impl IntoIterator<Item = VariableId>) -> Self {
        let mut layout = Self::default();
        for variable in variables {
            if layout.block(variable).is_some() {
                continue;
            }
            let count = evaluation.num_dofs(variable);
            layout.blocks.push((variable, layout.total, count));
            layout.total += count;
        }
        layout
    }

    /// Offset and count of `variable`'s DOFs.
    pub fn block(&self, variable: VariableId) -> Option<(usize, usize)> {
        self.blocks
            .iter()
            .find(|(var, _, _)| *var == variable)
            .map(|&(_, offset, count)| (offset, count))
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Data available to an AD kernel at a single Dirac point.
///
/// Variable values are [`DualNumber`]s seeded with the basis values, so any residual built from
/// them carries its exact derivatives with respect to the element DOFs.
#[derive(Clone, Copy)]
pub struct AdQpContext<'a> {
    context: QpContext<'a>,
    layout: &'a DofLayout,
}

impl<'a> AdQpContext<'a> {
    pub fn new(context: QpContext<'a>, layout: &'a DofLayout) -> Self {
        Self { context, layout }
    }

    /// The plain (non-dual) context.
    pub fn context(&self) -> &QpContext<'a> {
        &self.context
    }

    pub fn test(&self, i: usize) -> f64 {
        self.context.test(i)
    }

    pub fn point(&self) -> &PhysicalPoint {
        self.context.point()
    }

    pub fn time(&self) -> f64 {
        self.context.time()
    }

    pub fn u(&self) -> DualNumber {
        self.coupled_value(self.context.variable)
    }

    /// Value of `variable` as a dual number.
    ///
    /// Variables that are not part of the layout are returned as constants.
    pub fn coupled_value(&self, variable: VariableId) -> DualNumber {
        let value = self.context.coupled_value(variable);
        match self.layout.block(variable) {
            Some((offset, count)) => {
                let mut derivatives = DVector::zeros(self.layout.total());
                for k in 0..count {
                    derivatives[offset + k] = self.context.phi(k);
                }
                DualNumber::new(value, derivatives)
            }
            None => DualNumber::constant(value),
        }
    }

    pub fn material(&self, name: &str) -> Option<f64> {
        self.context.material(name)
    }
}
