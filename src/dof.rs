//! The variable/DOF collaborator.
use crate::error::DiracError;
use crate::mesh::{DiracMesh, SubdomainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Index of a solution variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub usize);

/// Read-only view of the variables of a system and their degrees of freedom.
pub trait DofMap: Send + Sync {
    /// Total number of degrees of freedom in the system.
    fn num_dofs(&self) -> usize;

    fn num_variables(&self) -> usize;

    fn variable_name(&self, variable: VariableId) -> &str;

    fn find_variable(&self, name: &str) -> Option<VariableId>;

    fn is_active_on_subdomain(&self, variable: VariableId, subdomain: SubdomainId) -> bool;

    /// Replaces the contents of `dofs` with the global DOF indices of `variable` on `element`.
    ///
    /// `dofs` is left empty if the variable is not active on the element's subdomain.
    fn populate_element_dofs(&self, variable: VariableId, mesh: &dyn DiracMesh, element: usize, dofs: &mut Vec<usize>);

    /// Pairs `(ivar, jvar)` for which the Jacobian block `d R_ivar / d u_jvar` may be nonzero.
    fn coupling_pairs(&self) -> Vec<(VariableId, VariableId)>;

    fn variable_id(&self, name: &str) -> Result<VariableId, DiracError> {
        self.find_variable(name)
            .ok_or_else(|| DiracError::UnknownVariable(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodalVariable {
    name: String,
    blocks: Option<BTreeSet<SubdomainId>>,
}

/// How variables are coupled in the Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub enum Coupling {
    /// Every variable is coupled to every other variable.
    Full,
    /// Only the diagonal blocks.
    Diagonal,
    /// An explicit list of `(ivar, jvar)` pairs. Diagonal pairs are always included.
    Custom(Vec<(VariableId, VariableId)>),
}

/// First-order nodal (Lagrange) variables, interleaved node by node.
///
/// The global DOF of variable `v` at node `n` is `n * num_variables + v`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodalDofMap {
    num_nodes: usize,
    variables: Vec<NodalVariable>,
    coupling: Coupling,
}

impl NodalDofMap {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            variables: Vec::new(),
            coupling: Coupling::Full,
        }
    }

    /// Adds a variable defined on the whole mesh.
    pub fn add_variable(&mut self, name: impl Into<String>) -> VariableId {
        self.push_variable(name.into(), None)
    }

    /// Adds a variable which is only active on the given subdomains.
    pub fn add_block_variable(
        &mut self,
        name: impl Into<String>,
        blocks: impl IntoIterator<Item = SubdomainId>,
    ) -> VariableId {
        self.push_variable(name.into(), Some(blocks.into_iter().collect()))
    }

    fn push_variable(&mut self, name: String, blocks: Option<BTreeSet<SubdomainId>>) -> VariableId {
        assert!(
            self.find_variable(&name).is_none(),
            "Variable names must be unique, but '{name}' already exists"
        );
        self.variables.push(NodalVariable { name, blocks });
        VariableId(self.variables.len() - 1)
    }

    pub fn with_coupling(mut self, coupling: Coupling) -> Self {
        self.coupling = coupling;
        self
    }

    pub fn set_coupling(&mut self, coupling: Coupling) {
        self.coupling = coupling;
    }

    pub fn dof_index(&self, variable: VariableId, node: usize) -> usize {
        node * self.variables.len() + variable.0
    }

    fn variables(&self) -> impl Iterator<Item = VariableId> {
        (0..self.variables.len()).map(VariableId)
    }
}

impl DofMap for NodalDofMap {
    fn num_dofs(&self) -> usize {
        self.num_nodes * self.variables.len()
    }

    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn variable_name(&self, variable: VariableId) -> &str {
        &self.variables[variable.0].name
    }

    fn find_variable(&self, name: &str) -> Option<VariableId> {
        self.variables
            .iter()
            .position(|var| var.name == name)
            .map(VariableId)
    }

    fn is_active_on_subdomain(&self, variable: VariableId, subdomain: SubdomainId) -> bool {
        match &self.variables[variable.0].blocks {
            None => true,
            Some(blocks) => blocks.contains(&subdomain),
        }
    }

    fn populate_element_dofs(&self, variable: VariableId, mesh: &dyn DiracMesh, element: usize, dofs: &mut Vec<usize>) {
        dofs.clear();
        if self.is_active_on_subdomain(variable, mesh.element_subdomain(element)) {
            dofs.extend(
                mesh.element_nodes(element)
                    .iter()
                    .map(|&node| self.dof_index(variable, node)),
            );
        }
    }

    fn coupling_pairs(&self) -> Vec<(VariableId, VariableId)> {
        match &self.coupling {
            Coupling::Full => self
                .variables()
                .flat_map(|ivar| self.variables().map(move |jvar| (ivar, jvar)))
                .collect(),
            Coupling::Diagonal => self.variables().map(|var| (var, var)).collect(),
            Coupling::Custom(pairs) => {
                let mut all: BTreeSet<_> = self.variables().map(|var| (var, var)).collect();
                all.extend(pairs.iter().copied());
                all.into_iter().collect()
            }
        }
    }
}
