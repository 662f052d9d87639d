//! Error types for decimation and replay.

use polyreduce_config::ConfigError;
use polyreduce_mesh::{ContractError, ManifoldError, MeshError};

/// Precondition failures reported before any work begins.
///
/// Nothing is mutated when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum DecimateError {
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("mesh is not manifold: {0}")]
    NonManifold(#[from] ManifoldError),
    #[error("mesh has no polygons")]
    EmptyMesh,
    #[error("point {0} has a non-finite position")]
    NonFinitePosition(u32),
    #[error("attribute channel '{name}' has dimension 0")]
    EmptyChannel { name: String },
    #[error("attribute channel '{name}' holds {found} values, expected {expected}")]
    ChannelLength {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("attribute channel '{name}' holds a non-finite value")]
    NonFiniteValue { name: String },
    #[error("attribute channel '{name}' has invalid weight {weight}")]
    ChannelWeight { name: String, weight: f64 },
    #[error("{found} point weights given for {expected} points")]
    PointWeightCount { expected: usize, found: usize },
    #[error("point {point} has invalid retention weight {value}")]
    PointWeight { point: u32, value: f64 },
    #[error("point {0} is out of range")]
    PointOutOfRange(u32),
    #[error("edge {0} -> {1} does not exist")]
    MissingEdge(u32, u32),
    #[error("channel {channel} does not exist ({count} channels)")]
    UnknownChannel { channel: usize, count: usize },
}

/// Failures while re-applying a recorded history.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Setup(#[from] DecimateError),
    #[error("history event {index} references missing edge {from} -> {to}")]
    MissingEdge { index: usize, from: u32, to: u32 },
    #[error("history event {index} was refused by the mesh: {source}")]
    Rejected {
        index: usize,
        #[source]
        source: ContractError,
    },
    #[error("history event {index}: polygon continues to {found}, recorded {expected}")]
    DissolveMismatch {
        index: usize,
        expected: u32,
        found: u32,
    },
    #[error("history event {index} names corner {corner} or channel {channel} out of range")]
    BadVertexMerge {
        index: usize,
        corner: u32,
        channel: u32,
    },
    #[error("batch starting at event {0} is never closed")]
    OpenBatch(usize),
}
