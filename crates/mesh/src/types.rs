//! Type definitions for the polygon mesh data structure.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Type-safe point identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub u32);

/// Type-safe half-edge identifier.
///
/// Every half-edge belongs to exactly one polygon, so a half-edge id also
/// names the polygon corner (vertex) sitting at its origin point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HalfEdgeId(pub u32);

/// Type-safe polygon identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolygonId(pub u32);

impl PointId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl HalfEdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl PolygonId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A point in the mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: DVec3,
    /// False once the point has been merged away (or was never referenced)
    pub alive: bool,
}

/// A half-edge in the mesh
#[derive(Debug, Clone, PartialEq)]
pub struct HalfEdge {
    /// The point this half-edge originates from
    pub origin: PointId,
    /// The opposite half-edge (None for boundary edges)
    pub twin: Option<HalfEdgeId>,
    /// The next half-edge around the polygon
    pub next: HalfEdgeId,
    /// The previous half-edge around the polygon
    pub prev: HalfEdgeId,
    /// The owning polygon (None once the slot is dead)
    pub polygon: Option<PolygonId>,
}

/// A polygon in the mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// One half-edge on the boundary of this polygon
    pub half_edge: HalfEdgeId,
    pub alive: bool,
}

/// Whether `contract` validates the collapse before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Refuse collapses that would break manifoldness
    #[default]
    Full,
    /// Trust the caller (used after an explicit `can_contract`)
    Skip,
}

/// Errors raised while building or validating a mesh
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Polygon {polygon} references point {point} but only {count} positions exist")]
    PointOutOfRange { polygon: usize, point: u32, count: usize },
    #[error("Polygon {polygon} has {corners} corners, at least 3 are required")]
    TooFewCorners { polygon: usize, corners: usize },
    #[error("Polygon {polygon} uses point {point} more than once")]
    RepeatedPoint { polygon: usize, point: u32 },
    #[error("Directed edge {from} -> {to} is used by more than one polygon")]
    NonManifoldEdge { from: u32, to: u32 },
    #[error("Mesh has more elements than 32-bit ids can address")]
    TooLarge,
    #[error("Invalid mesh topology: {0}")]
    InvalidTopology(String),
}

/// Reasons a local topology operation was refused.
///
/// A refusal never mutates the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("half-edge or endpoint is no longer alive")]
    Dead,
    #[error("removed point touches polygons outside the working group")]
    Frozen,
    #[error("collapse would merge two boundary loops through an interior edge")]
    BoundaryLoopMerge,
    #[error("a polygon contains both endpoints without sharing the edge")]
    Pinch,
    #[error("endpoints share a neighbour that no adjacent triangle explains")]
    LinkCondition,
    #[error("two polygons would end up with the same points")]
    DuplicatePolygon,
    #[error("a point would be left without polygons")]
    Disconnect,
    #[error("edge lies on the boundary")]
    BoundaryEdge,
    #[error("polygons share more than one edge")]
    SharedEdges,
}

impl ContractError {
    /// Refusals that no later change to the neighbourhood can lift.
    pub fn is_permanent(self) -> bool {
        matches!(self, ContractError::Disconnect)
    }
}

/// Result of a successful `contract`.
#[derive(Debug, Clone)]
pub struct Contraction {
    pub survivor: PointId,
    pub removed: PointId,
    /// Polygons deleted because they degenerated to two corners
    pub deleted_polygons: Vec<PolygonId>,
    /// Outer half-edge pairs that became twins when a degenerate polygon
    /// was removed
    pub stitched: Vec<(Option<HalfEdgeId>, Option<HalfEdgeId>)>,
}
