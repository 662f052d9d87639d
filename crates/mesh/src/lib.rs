//! Half-edge polygon mesh for decimation.
//!
//! Points, half-edges and polygons live in flat arenas addressed by
//! integer ids. Topology surgery (`contract`, `dissolve`) marks slots dead
//! instead of removing them, so ids recorded in a history stay valid for
//! the whole lifetime of a mesh.

mod construction;
mod group;
mod modification;
mod topology;
mod types;
mod undo;
mod validation;

use std::collections::HashMap;

pub use group::Group;
pub use modification::CompactionMap;
pub use topology::newell_normal;
pub use undo::{MeshUndo, Region};
pub use types::{
    CheckMode, ContractError, Contraction, HalfEdge, HalfEdgeId, MeshError, Point, PointId,
    Polygon, PolygonId,
};
pub use validation::ManifoldError;

/// Arena half-edge mesh with arbitrary polygon arity.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyMesh {
    pub(crate) points: Vec<Point>,
    pub(crate) half_edges: Vec<HalfEdge>,
    pub(crate) polygons: Vec<Polygon>,
    /// Map from (origin, destination) point pair to half-edge
    pub(crate) edge_map: HashMap<(PointId, PointId), HalfEdgeId>,
    pub(crate) live_points: usize,
    pub(crate) live_polygons: usize,
    pub(crate) group: Option<Group>,
    /// Outgoing half-edges per point, built on demand by `ensure_incidence`
    pub(crate) incidence: Option<Vec<Vec<HalfEdgeId>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    pub(crate) fn square() -> PolyMesh {
        PolyMesh::from_polygons(
            &[
                DVec3::new(0.0, 0.0, 0.0),
                DVec3::new(1.0, 0.0, 0.0),
                DVec3::new(1.0, 1.0, 0.0),
                DVec3::new(0.0, 1.0, 0.0),
            ],
            &[vec![0, 1, 2], vec![0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn test_square_counts() {
        let mesh = square();
        assert_eq!(mesh.num_points(), 4);
        assert_eq!(mesh.num_polygons(), 2);
        assert_eq!(mesh.half_edge_capacity(), 6);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_polygon_points() {
        let mesh = square();
        let points = mesh.polygon_points(PolygonId(1));
        assert_eq!(points, vec![PointId(0), PointId(2), PointId(3)]);
    }

    #[test]
    fn test_point_polygons() {
        let mesh = square();
        let mut polys = mesh.point_polygons(PointId(0));
        polys.sort();
        assert_eq!(polys, vec![PolygonId(0), PolygonId(1)]);
        assert_eq!(mesh.point_polygons(PointId(1)), vec![PolygonId(0)]);
    }
}
