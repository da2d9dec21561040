//! Dirac point sources and sinks for finite element assembly.
//!
//! Point loads which are not tied to mesh nodes are registered on the elements containing
//! them, and contribute to the residual and Jacobian through the basis functions of those
//! elements evaluated at the points. On a partitioned mesh, every point is owned by exactly
//! one partition.
pub mod assembly;
pub mod dof;
pub mod driver;
pub mod dual;
pub mod element;
pub mod error;
pub mod evaluation;
pub mod kernel;
pub mod locator;
pub mod material;
pub mod mesh;
pub mod parallel;
pub mod point;
pub mod registry;
pub mod system;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
