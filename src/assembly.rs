//! Accumulation of local contributions into tagged global residuals and Jacobians.
use crate::nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifies a residual vector or Jacobian matrix of the system.
///
/// Contributors declare which tags they contribute to; an evaluation requests a set of tags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub usize);

impl TagId {
    /// The tag of the nonlinear residual and of the system Jacobian.
    pub const SYSTEM: TagId = TagId(0);
}

impl Default for TagId {
    fn default() -> Self {
        Self::SYSTEM
    }
}

/// The subset of tags requested by an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSelection {
    /// Every tag known to the system.
    All,
    /// Exactly one tag. Contributor selection takes a fast path.
    One(TagId),
    /// Several, but not all, tags.
    Many(BTreeSet<TagId>),
}

impl TagSelection {
    /// Classifies `requested` relative to the tags `available` in the system.
    pub fn from_requested(requested: &BTreeSet<TagId>, available: &BTreeSet<TagId>) -> Self {
        if requested == available {
            return Self::All;
        }
        let mut iter = requested.iter();
        match (iter.next(), iter.next()) {
            (Some(&tag), None) => Self::One(tag),
            _ => Self::Many(requested.clone()),
        }
    }

    /// Whether a contributor declaring `tags` takes part in this evaluation.
    pub fn selects(&self, tags: &BTreeSet<TagId>) -> bool {
        match self {
            Self::All => !tags.is_empty(),
            Self::One(tag) => tags.contains(tag),
            Self::Many(requested) => !requested.is_disjoint(tags),
        }
    }

    /// The tags among `tags` that this evaluation writes to.
    pub fn filter<'a>(&'a self, tags: &'a BTreeSet<TagId>) -> impl 'a + Iterator<Item = TagId> {
        tags.iter().copied().filter(move |tag| match self {
            Self::All => true,
            Self::One(selected) => selected == tag,
            Self::Many(requested) => requested.contains(tag),
        })
    }
}

#[derive(Debug)]
struct SystemData {
    residuals: BTreeMap<TagId, DVector<f64>>,
    jacobians: BTreeMap<TagId, CooMatrix<f64>>,
}

/// Tagged residual vectors and Jacobian matrices of a system.
///
/// All mutation goes through a lock, so element contributions may be appended concurrently
/// from several threads. This is the only serialization point of Dirac assembly.
#[derive(Debug)]
pub struct GlobalSystem {
    num_dofs: usize,
    vector_tags: BTreeSet<TagId>,
    matrix_tags: BTreeSet<TagId>,
    data: Mutex<SystemData>,
}

impl GlobalSystem {
    /// A system with the single [`TagId::SYSTEM`] vector and matrix tag.
    pub fn new(num_dofs: usize) -> Self {
        Self::with_tags(num_dofs, [TagId::SYSTEM], [TagId::SYSTEM])
    }

    pub fn with_tags(
        num_dofs: usize,
        vector_tags: impl IntoIterator<Item = TagId>,
        matrix_tags: impl IntoIterator<Item = TagId>,
    ) -> Self {
        let vector_tags: BTreeSet<_> = vector_tags.into_iter().collect();
        let matrix_tags: BTreeSet<_> = matrix_tags.into_iter().collect();
        let data = SystemData {
            residuals: vector_tags
                .iter()
                .map(|&tag| (tag, DVector::zeros(num_dofs)))
                .collect(),
            jacobians: matrix_tags
                .iter()
                .map(|&tag| (tag, CooMatrix::new(num_dofs, num_dofs)))
                .collect(),
        };
        Self {
            num_dofs,
            vector_tags,
            matrix_tags,
            data: Mutex::new(data),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn vector_tags(&self) -> &BTreeSet<TagId> {
        &self.vector_tags
    }

    pub fn matrix_tags(&self) -> &BTreeSet<TagId> {
        &self.matrix_tags
    }

    /// Adds `local[k]` to entry `dofs[k]` of the residual of each of `tags`.
    ///
    /// Tags not known to the system are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `dofs` and `local` have different lengths, or a DOF index is out of bounds.
    pub fn add_residual(&self, tags: impl IntoIterator<Item = TagId>, dofs: &[usize], local: &DVector<f64>) {
        assert_eq!(dofs.len(), local.len(), "Local residual must have one entry per DOF");
        let mut data = self.data.lock();
        for tag in tags {
            if let Some(residual) = data.residuals.get_mut(&tag) {
                for (&dof, value) in dofs.iter().zip(local.iter()) {
                    residual[dof] += *value;
                }
            }
        }
    }

    /// Adds the block `local` with rows `row_dofs` and columns `col_dofs` to the Jacobian of
    /// each of `tags`.
    ///
    /// Tags not known to the system are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions of `local` do not match the DOF lists.
    pub fn add_jacobian(
        &self,
        tags: impl IntoIterator<Item = TagId>,
        row_dofs: &[usize],
        col_dofs: &[usize],
        local: &DMatrix<f64>,
    ) {
        assert_eq!(local.nrows(), row_dofs.len(), "Local Jacobian rows must match row DOFs");
        assert_eq!(local.ncols(), col_dofs.len(), "Local Jacobian columns must match column DOFs");
        let mut data = self.data.lock();
        for tag in tags {
            if let Some(jacobian) = data.jacobians.get_mut(&tag) {
                for (i, &row) in row_dofs.iter().enumerate() {
                    for (j, &col) in col_dofs.iter().enumerate() {
                        jacobian.push(row, col, local[(i, j)]);
                    }
                }
            }
        }
    }

    /// Zeroes all residuals and Jacobians.
    pub fn zero(&self) {
        let mut data = self.data.lock();
        for residual in data.residuals.values_mut() {
            residual.fill(0.0);
        }
        let n = self.num_dofs;
        for jacobian in data.jacobians.values_mut() {
            *jacobian = CooMatrix::new(n, n);
        }
    }

    pub fn residual(&self, tag: TagId) -> Option<DVector<f64>> {
        self.data.lock().residuals.get(&tag).cloned()
    }

    /// The Jacobian for `tag` in compressed form, with duplicate entries summed.
    pub fn jacobian(&self, tag: TagId) -> Option<CsrMatrix<f64>> {
        self.data
            .lock()
            .jacobians
            .get(&tag)
            .map(CsrMatrix::from)
    }

    pub fn dense_jacobian(&self, tag: TagId) -> Option<DMatrix<f64>> {
        self.data
            .lock()
            .jacobians
            .get(&tag)
            .map(DMatrix::from)
    }
}
