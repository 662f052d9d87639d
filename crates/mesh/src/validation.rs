//! Validation methods for PolyMesh.
//!
//! Dead slots are skipped everywhere; they are expected after collapses.

use super::types::{HalfEdgeId, MeshError, PointId};
use super::PolyMesh;

impl PolyMesh {
    /// Validate connectivity, the edge map and the live counters.
    pub fn validate(&self) -> Result<(), MeshError> {
        let invalid = |msg: String| Err(MeshError::InvalidTopology(msg));

        for (i, he) in self.half_edges.iter().enumerate() {
            let id = HalfEdgeId(i as u32);
            let Some(poly) = he.polygon else {
                continue;
            };

            if !self.is_polygon_alive(poly) {
                return invalid(format!("{:?} belongs to dead polygon {:?}", id, poly));
            }
            if !self.is_point_alive(he.origin) {
                return invalid(format!("{:?} starts at dead point {:?}", id, he.origin));
            }
            if self.half_edges[he.next.index()].prev != id {
                return invalid(format!("{:?}: next.prev does not point back", id));
            }
            if self.half_edges[he.prev.index()].next != id {
                return invalid(format!("{:?}: prev.next does not point back", id));
            }
            if self.half_edges[he.next.index()].polygon != Some(poly) {
                return invalid(format!("{:?}: next half-edge is in another polygon", id));
            }

            if let Some(twin) = he.twin {
                let twin_he = &self.half_edges[twin.index()];
                if twin_he.polygon.is_none() {
                    return invalid(format!("{:?}: twin {:?} is dead", id, twin));
                }
                if twin_he.twin != Some(id) {
                    return invalid(format!("{:?}: twin symmetry violated", id));
                }
                if self.dest_point(twin) != he.origin || twin_he.origin != self.dest_point(id) {
                    return invalid(format!("{:?}: twin direction mismatch", id));
                }
            }

            let key = (he.origin, self.dest_point(id));
            if self.edge_map.get(&key) != Some(&id) {
                return invalid(format!("{:?}: edge map entry for {:?} is stale", id, key));
            }
        }

        let live_half_edges = self.half_edge_ids().count();
        if self.edge_map.len() != live_half_edges {
            return invalid(format!(
                "edge map holds {} entries for {} live half-edges",
                self.edge_map.len(),
                live_half_edges
            ));
        }

        for poly in self.polygon_ids() {
            let cycle = self.polygon_half_edges(poly);
            if cycle.len() < 3 {
                return invalid(format!("{:?} has {} corners", poly, cycle.len()));
            }
            if cycle.len() > self.half_edges.len() {
                return invalid(format!("{:?}: cycle does not close", poly));
            }
            let mut points = self.polygon_points(poly);
            points.sort_unstable();
            points.dedup();
            if points.len() != cycle.len() {
                return invalid(format!("{:?} visits a point twice", poly));
            }
        }

        if self.polygon_ids().count() != self.live_polygons {
            return invalid("live polygon counter is out of date".to_string());
        }
        if self.point_ids().count() != self.live_points {
            return invalid("live point counter is out of date".to_string());
        }

        if let Some(incidence) = &self.incidence {
            for (i, list) in incidence.iter().enumerate() {
                for &h in list {
                    let he = &self.half_edges[h.index()];
                    if he.polygon.is_none() || he.origin.index() != i {
                        return invalid(format!("incidence of point {} lists {:?}", i, h));
                    }
                }
            }
            let cached: usize = incidence.iter().map(|l| l.len()).sum();
            if cached != live_half_edges {
                return invalid("incidence cache misses live half-edges".to_string());
            }
        }

        Ok(())
    }

    // =========================================================================
    // Manifold Validation
    // =========================================================================

    /// Check that every point has a single fan of polygons.
    ///
    /// An interior point has as many neighbours as outgoing half-edges; a
    /// boundary point has exactly one more. Anything else means the fan is
    /// split (a bowtie) or the point is isolated.
    pub fn check_manifold(&self) -> Result<(), ManifoldError> {
        for h in self.half_edge_ids() {
            if let Some(twin) = self.twin(h) {
                if self.twin(twin) != Some(h) || self.source_point(twin) != self.dest_point(h) {
                    return Err(ManifoldError::NonManifoldEdge {
                        half_edge: h,
                        reason: "twin mismatch".to_string(),
                    });
                }
            }
        }

        for point in self.point_ids() {
            let outgoing = self.outgoing(point).len();
            if outgoing == 0 {
                return Err(ManifoldError::IsolatedPoint { point });
            }
            let boundary_gaps = self
                .outgoing(point)
                .into_iter()
                .filter(|&h| self.twin(h).is_none())
                .count();
            let neighbours = self.neighbors(point).len();
            if boundary_gaps > 1 || neighbours != outgoing + boundary_gaps {
                return Err(ManifoldError::NonManifoldPoint {
                    point,
                    neighbours,
                    polygons: outgoing,
                });
            }
        }

        Ok(())
    }
}

/// Error types for manifold validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Twin links disagree
    NonManifoldEdge { half_edge: HalfEdgeId, reason: String },
    /// The polygons around a point do not form one fan
    NonManifoldPoint {
        point: PointId,
        neighbours: usize,
        polygons: usize,
    },
    /// A live point without polygons
    IsolatedPoint { point: PointId },
}

impl std::fmt::Display for ManifoldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonManifoldEdge { half_edge, reason } => {
                write!(f, "Non-manifold edge {:?}: {}", half_edge, reason)
            }
            Self::NonManifoldPoint {
                point,
                neighbours,
                polygons,
            } => {
                write!(
                    f,
                    "Non-manifold point {:?}: {} neighbours around {} polygon corners",
                    point, neighbours, polygons
                )
            }
            Self::IsolatedPoint { point } => write!(f, "Point {:?} has no polygons", point),
        }
    }
}

impl std::error::Error for ManifoldError {}
