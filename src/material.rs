//! Material properties seen by Dirac kernels.
//!
//! Dirac kernels are evaluated outside of the regular element loop, so the ordering of their
//! material evaluations relative to the ordinary ones is not guaranteed. Stateful (old or
//! older) properties would have their history corrupted, and are therefore rejected when a
//! kernel is constructed.
use crate::error::DiracError;
use crate::mesh::SubdomainId;
use crate::point::PhysicalPoint;
use std::collections::BTreeMap;

/// Which time level of a property is requested.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PropertyState {
    Current,
    Old,
    Older,
}

/// A request for a material property made by a kernel at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialPropertyRequest {
    name: String,
    state: PropertyState,
}

impl MaterialPropertyRequest {
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PropertyState::Current,
        }
    }

    pub fn old(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PropertyState::Old,
        }
    }

    pub fn older(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PropertyState::Older,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PropertyState {
        self.state
    }
}

/// The material properties a kernel has requested.
///
/// Once any property has been requested the kernel is considered to need materials, and the
/// driver reinitializes materials on every element where the kernel has points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialRequests {
    names: Vec<String>,
}

impl MaterialRequests {
    /// Records a request, rejecting stateful properties.
    pub fn request(&mut self, contributor: &str, request: &MaterialPropertyRequest) -> Result<(), DiracError> {
        if request.state != PropertyState::Current {
            return Err(DiracError::StatefulMaterialProperty {
                contributor: contributor.to_string(),
                property: request.name.clone(),
            });
        }
        if !self.names.contains(&request.name) {
            self.names.push(request.name.clone());
        }
        Ok(())
    }

    pub fn has_requests(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Evaluates material properties at the Dirac points of an element.
pub trait MaterialStore {
    /// Computes properties at `points` of `element`.
    ///
    /// Must never swap or otherwise advance stateful (time history) data.
    fn reinit_at_points(
        &mut self,
        element: usize,
        subdomain: SubdomainId,
        points: &[PhysicalPoint],
    ) -> Result<(), DiracError>;

    /// Value of the named property at point `qp` of the last reinitialized element.
    fn property(&self, name: &str, qp: usize) -> Option<f64>;

    /// Releases data computed for the last element.
    fn clear_active(&mut self) {}
}

/// A material store with piecewise constant properties per subdomain.
#[derive(Debug, Default)]
pub struct ConstantMaterialStore {
    values: BTreeMap<(SubdomainId, String), f64>,
    active: Vec<BTreeMap<String, f64>>,
    reinit_count: usize,
}

impl ConstantMaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, subdomain: SubdomainId, name: impl Into<String>, value: f64) -> Self {
        self.set_property(subdomain, name, value);
        self
    }

    pub fn set_property(&mut self, subdomain: SubdomainId, name: impl Into<String>, value: f64) {
        self.values.insert((subdomain, name.into()), value);
    }

    /// Number of element reinitializations performed so far.
    pub fn reinit_count(&self) -> usize {
        self.reinit_count
    }
}

impl MaterialStore for ConstantMaterialStore {
    fn reinit_at_points(
        &mut self,
        _element: usize,
        subdomain: SubdomainId,
        points: &[PhysicalPoint],
    ) -> Result<(), DiracError> {
        let properties: BTreeMap<String, f64> = self
            .values
            .iter()
            .filter(|((block, _), _)| *block == subdomain)
            .map(|((_, name), value)| (name.clone(), *value))
            .collect();
        self.active.clear();
        self.active.resize(points.len(), properties);
        self.reinit_count += 1;
        Ok(())
    }

    fn property(&self, name: &str, qp: usize) -> Option<f64> {
        self.active.get(qp)?.get(name).copied()
    }

    fn clear_active(&mut self) {
        self.active.clear();
    }
}
