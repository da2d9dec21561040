//! Ready-made point sources and sinks.
use crate::dof::{DofMap, VariableId};
use crate::dual::DualNumber;
use crate::error::DiracError;
use crate::evaluation::{AdQpContext, QpContext};
use crate::kernel::{
    AdDiracKernel, AdPointContribution, DiracKernel, DiracKernelParameters, ManualPointContribution, PointCollector,
};
use crate::point::{points_from_flat_coordinates, PhysicalPoint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

fn default_dim() -> usize {
    3
}

fn parse_points(contributor: &str, coordinates: &[f64], dim: usize) -> Result<Vec<PhysicalPoint>, DiracError> {
    if coordinates.is_empty() {
        return Err(DiracError::configuration(contributor, "at least one point is required"));
    }
    points_from_flat_coordinates(coordinates, dim).ok_or_else(|| {
        DiracError::configuration(
            contributor,
            format!(
                "the number of point coordinates ({}) must be a multiple of the mesh dimension ({})",
                coordinates.len(),
                dim
            ),
        )
    })
}

/// Parameters of [`ConstantPointSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantPointSourceParameters {
    #[serde(flatten)]
    pub kernel: DiracKernelParameters,
    /// Strength of the source at every point.
    pub value: f64,
    /// Flat list of point coordinates, `dim` values per point.
    pub point: Vec<f64>,
    #[serde(default = "default_dim")]
    pub dim: usize,
}

/// A source of constant strength at a fixed set of points.
///
/// Contributes `-value * test_i` at each point.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPointSource {
    value: f64,
    points: Vec<PhysicalPoint>,
}

impl ConstantPointSource {
    pub fn new(value: f64, points: Vec<PhysicalPoint>) -> Self {
        Self { value, points }
    }

    pub fn from_parameters(
        params: &ConstantPointSourceParameters,
        dof_map: &dyn DofMap,
    ) -> Result<DiracKernel<Self>, DiracError> {
        let points = parse_points(&params.kernel.name, &params.point, params.dim)?;
        DiracKernel::new(&params.kernel, dof_map, Self::new(params.value, points))
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub fn points(&self) -> &[PhysicalPoint] {
        &self.points
    }

    pub fn set_points(&mut self, points: Vec<PhysicalPoint>) {
        self.points = points;
    }
}

impl ManualPointContribution for ConstantPointSource {
    fn add_points(&mut self, points: &mut PointCollector, _time: f64) -> Result<(), DiracError> {
        for (id, point) in self.points.iter().enumerate() {
            points.add_point_with_id(*point, id as u64);
        }
        Ok(())
    }

    fn compute_qp_residual(&self, i: usize, qp: &QpContext) -> f64 {
        -qp.test(i) * self.value
    }
}

/// A function of position and time.
pub type SourceFunction = Arc<dyn Fn(&PhysicalPoint, f64) -> f64 + Send + Sync>;

/// A source at a single point whose strength is a function of position and time.
#[derive(Clone)]
pub struct FunctionDiracSource {
    point: PhysicalPoint,
    function: SourceFunction,
}

impl fmt::Debug for FunctionDiracSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDiracSource")
            .field("point", &self.point)
            .finish_non_exhaustive()
    }
}

impl FunctionDiracSource {
    pub fn new(point: PhysicalPoint, function: SourceFunction) -> Self {
        Self { point, function }
    }

    pub fn point(&self) -> &PhysicalPoint {
        &self.point
    }
}

impl ManualPointContribution for FunctionDiracSource {
    fn add_points(&mut self, points: &mut PointCollector, _time: f64) -> Result<(), DiracError> {
        points.add_point(self.point);
        Ok(())
    }

    fn compute_qp_residual(&self, i: usize, qp: &QpContext) -> f64 {
        -qp.test(i) * (self.function)(qp.point(), qp.time())
    }
}

/// A scalar value shared between the producer of a value and the contributors reading it.
#[derive(Debug, Clone, Default)]
pub struct SharedScalar(Arc<RwLock<f64>>);

impl SharedScalar {
    pub fn new(value: f64) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> f64 {
        *self.0.read()
    }

    pub fn set(&self, value: f64) {
        *self.0.write() = value;
    }
}

/// A source at a single point whose strength is read from a [`SharedScalar`], typically the
/// result of a postprocessing step.
#[derive(Debug, Clone)]
pub struct PostprocessorDiracSource {
    point: PhysicalPoint,
    value: SharedScalar,
}

impl PostprocessorDiracSource {
    pub fn new(point: PhysicalPoint, value: SharedScalar) -> Self {
        Self { point, value }
    }
}

impl ManualPointContribution for PostprocessorDiracSource {
    fn add_points(&mut self, points: &mut PointCollector, _time: f64) -> Result<(), DiracError> {
        points.add_point(self.point);
        Ok(())
    }

    fn compute_qp_residual(&self, i: usize, qp: &QpContext) -> f64 {
        -qp.test(i) * self.value.get()
    }
}

/// Parameters of [`ReactionPointSink`] and [`AdReactionPointSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionPointSinkParameters {
    #[serde(flatten)]
    pub kernel: DiracKernelParameters,
    pub coefficient: f64,
    pub point: Vec<f64>,
    #[serde(default = "default_dim")]
    pub dim: usize,
}

/// Resolves the optional modulating variable, the first coupled variable.
fn modulating_variable(params: &DiracKernelParameters, dof_map: &dyn DofMap) -> Result<Option<VariableId>, DiracError> {
    params
        .coupled_variables
        .first()
        .map(|name| dof_map.variable_id(name))
        .transpose()
}

/// A nonlinear point sink `k u^2 (1 + v)`, where `v` is an optional coupled variable.
///
/// Derivatives are hand-written.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionPointSink {
    coefficient: f64,
    points: Vec<PhysicalPoint>,
    coupled: Option<VariableId>,
}

impl ReactionPointSink {
    pub fn from_parameters(
        params: &ReactionPointSinkParameters,
        dof_map: &dyn DofMap,
    ) -> Result<DiracKernel<Self>, DiracError> {
        let sink = Self {
            coefficient: params.coefficient,
            points: parse_points(&params.kernel.name, &params.point, params.dim)?,
            coupled: modulating_variable(&params.kernel, dof_map)?,
        };
        DiracKernel::new(&params.kernel, dof_map, sink)
    }

    fn v(&self, qp: &QpContext) -> f64 {
        self.coupled
            .map(|var| qp.coupled_value(var))
            .unwrap_or(0.0)
    }
}

impl ManualPointContribution for ReactionPointSink {
    fn add_points(&mut self, points: &mut PointCollector, _time: f64) -> Result<(), DiracError> {
        for point in &self.points {
            points.add_point(*point);
        }
        Ok(())
    }

    fn compute_qp_residual(&self, i: usize, qp: &QpContext) -> f64 {
        let u = qp.u();
        qp.test(i) * self.coefficient * u * u * (1.0 + self.v(qp))
    }

    fn compute_qp_jacobian(&self, i: usize, j: usize, qp: &QpContext) -> f64 {
        qp.test(i) * self.coefficient * 2.0 * qp.u() * qp.phi(j) * (1.0 + self.v(qp))
    }

    fn compute_qp_off_diag_jacobian(&self, i: usize, j: usize, jvar: VariableId, qp: &QpContext) -> f64 {
        if Some(jvar) != self.coupled {
            return 0.0;
        }
        let u = qp.u();
        qp.test(i) * self.coefficient * u * u * qp.phi(j)
    }
}

/// The sink of [`ReactionPointSink`], differentiated automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct AdReactionPointSink {
    coefficient: f64,
    points: Vec<PhysicalPoint>,
    coupled: Option<VariableId>,
}

impl AdReactionPointSink {
    pub fn from_parameters(
        params: &ReactionPointSinkParameters,
        dof_map: &dyn DofMap,
    ) -> Result<AdDiracKernel<Self>, DiracError> {
        let sink = Self {
            coefficient: params.coefficient,
            points: parse_points(&params.kernel.name, &params.point, params.dim)?,
            coupled: modulating_variable(&params.kernel, dof_map)?,
        };
        AdDiracKernel::new(&params.kernel, dof_map, sink)
    }
}

impl AdPointContribution for AdReactionPointSink {
    fn add_points(&mut self, points: &mut PointCollector, _time: f64) -> Result<(), DiracError> {
        for point in &self.points {
            points.add_point(*point);
        }
        Ok(())
    }

    fn compute_qp_residual(&self, i: usize, qp: &AdQpContext) -> DualNumber {
        let u = qp.u();
        let v = self
            .coupled
            .map(|var| qp.coupled_value(var))
            .unwrap_or_else(|| DualNumber::constant(0.0));
        (&u * &u) * (v + 1.0) * (qp.test(i) * self.coefficient)
    }
}
