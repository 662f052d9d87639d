//! polyreduce - quadric mesh decimation with a replayable history
//!
//! This crate drives the reduction of a [`PolyMesh`]:
//! - [`decimator`] - the collapse loop and its [`Decimator`] facade
//! - [`attributes`] - per-point and per-corner attribute channels
//! - [`constraints`] - pinned points, hard and crease edges
//! - [`quadric`] - position and attribute error quadrics
//! - [`rings`] - quad rings collapsed as one unit
//! - [`history`] - the event log and its persisted forms
//! - [`replay`] - rebuilding any level of detail from a log

pub mod attributes;
pub mod constraints;
pub mod decimator;
pub mod error;
pub mod history;
pub mod quadric;
pub mod real;
pub mod replay;
pub mod rings;

mod collapse;
mod dissolve;
mod scheduler;
mod wedge;

#[cfg(test)]
mod fixtures;

pub use attributes::{AttributeChannel, AttributeSet, ChannelState, CornerAttributes, Storage};
pub use constraints::{EdgeKind, Hardening};
pub use decimator::{Decimator, ReduceOutcome, StopReason};
pub use error::{DecimateError, ReplayError};
pub use history::{EventRecord, HistoryEvent, HistoryFormatError, HistoryLog, SerializedEvent};
pub use real::Real;
pub use replay::{PositionSource, ReplayOutcome, Replayer, reduce_from_history};
pub use rings::{Ring, classify_rings};

pub use polyreduce_config::{
    ConfigError, DecimateConfig, Placement, QuadricWeights, ReduceTargets, RingConfig, Target,
};
pub use polyreduce_mesh::{
    CheckMode, ContractError, Group, HalfEdgeId, ManifoldError, MeshError, PointId, PolyMesh,
    PolygonId,
};
