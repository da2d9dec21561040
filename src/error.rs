//! Error types.
use crate::mesh::SubdomainId;
use crate::point::PhysicalPoint;
use std::collections::BTreeSet;

/// Errors raised by the Dirac subsystem.
///
/// Configuration errors are raised when a contributor is constructed. Location errors are
/// only raised when the contributor's [point-not-found policy](crate::kernel::PointNotFoundBehavior)
/// asks for it.
#[derive(thiserror::Error, Debug)]
pub enum DiracError {
    #[error("invalid configuration for '{contributor}': {message}")]
    Configuration { contributor: String, message: String },
    #[error("'{contributor}' requested stateful material property '{property}', which is not supported by Dirac kernels")]
    StatefulMaterialProperty { contributor: String, property: String },
    #[error("point {point} of '{contributor}' was not found in the mesh (blocks: {})", format_blocks(.blocks))]
    PointNotFound {
        contributor: String,
        point: PhysicalPoint,
        blocks: Option<BTreeSet<SubdomainId>>,
    },
    #[error("point {0} is outside of the local mesh and out-of-mesh mode is disabled")]
    PointOutsideMesh(PhysicalPoint),
    #[error("invalid value '{value}' for parameter '{parameter}'")]
    InvalidParameter { parameter: String, value: String },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("failed to evaluate element {element}: {message}")]
    Evaluation { element: usize, message: String },
}

impl DiracError {
    pub fn configuration(contributor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            contributor: contributor.into(),
            message: message.into(),
        }
    }
}

fn format_blocks(blocks: &Option<BTreeSet<SubdomainId>>) -> String {
    match blocks {
        None => "ANY".to_string(),
        Some(blocks) => {
            let ids: Vec<_> = blocks.iter().map(ToString::to_string).collect();
            ids.join(" ")
        }
    }
}
