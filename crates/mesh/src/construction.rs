//! Construction methods for PolyMesh.

use glam::DVec3;
use std::collections::HashMap;

use super::types::{HalfEdge, HalfEdgeId, MeshError, Point, PointId, Polygon, PolygonId};
use super::PolyMesh;

impl PolyMesh {
    /// Build a mesh from positions and polygon point lists.
    ///
    /// Each polygon lists its points in winding order. Polygons must have at
    /// least three distinct points, and every directed edge may be used by a
    /// single polygon (consistent winding, manifold edges). Points that no
    /// polygon references are kept as dead slots so input indices stay valid.
    pub fn from_polygons<P: AsRef<[u32]>>(
        positions: &[DVec3],
        polygons: &[P],
    ) -> Result<Self, MeshError> {
        if positions.len() > u32::MAX as usize || polygons.len() > u32::MAX as usize {
            return Err(MeshError::TooLarge);
        }

        let mut points: Vec<Point> = positions
            .iter()
            .map(|&position| Point {
                position,
                alive: false,
            })
            .collect();

        let corner_total: usize = polygons.iter().map(|p| p.as_ref().len()).sum();
        if corner_total > u32::MAX as usize {
            return Err(MeshError::TooLarge);
        }

        let mut half_edges: Vec<HalfEdge> = Vec::with_capacity(corner_total);
        let mut faces: Vec<Polygon> = Vec::with_capacity(polygons.len());
        let mut edge_map: HashMap<(PointId, PointId), HalfEdgeId> =
            HashMap::with_capacity(corner_total);

        for (poly_idx, polygon) in polygons.iter().enumerate() {
            let indices = polygon.as_ref();
            let n = indices.len();
            if n < 3 {
                return Err(MeshError::TooFewCorners {
                    polygon: poly_idx,
                    corners: n,
                });
            }
            for (i, &point) in indices.iter().enumerate() {
                if point as usize >= positions.len() {
                    return Err(MeshError::PointOutOfRange {
                        polygon: poly_idx,
                        point,
                        count: positions.len(),
                    });
                }
                if indices[..i].contains(&point) {
                    return Err(MeshError::RepeatedPoint {
                        polygon: poly_idx,
                        point,
                    });
                }
            }

            let polygon_id = PolygonId(poly_idx as u32);
            let base = half_edges.len() as u32;

            for (i, &point) in indices.iter().enumerate() {
                let id = HalfEdgeId(base + i as u32);
                let origin = PointId(point);
                let dest = PointId(indices[(i + 1) % n]);

                if edge_map.contains_key(&(origin, dest)) {
                    return Err(MeshError::NonManifoldEdge {
                        from: origin.0,
                        to: dest.0,
                    });
                }

                half_edges.push(HalfEdge {
                    origin,
                    twin: None,
                    next: HalfEdgeId(base + ((i + 1) % n) as u32),
                    prev: HalfEdgeId(base + ((i + n - 1) % n) as u32),
                    polygon: Some(polygon_id),
                });

                // Link twins with the opposite half-edge if it already exists
                if let Some(&twin_id) = edge_map.get(&(dest, origin)) {
                    half_edges[id.index()].twin = Some(twin_id);
                    half_edges[twin_id.index()].twin = Some(id);
                }
                edge_map.insert((origin, dest), id);
                points[origin.index()].alive = true;
            }

            faces.push(Polygon {
                half_edge: HalfEdgeId(base),
                alive: true,
            });
        }

        let live_points = points.iter().filter(|p| p.alive).count();
        let unused = points.len() - live_points;
        if unused > 0 {
            tracing::debug!(
                "from_polygons: {} of {} points are not referenced by any polygon",
                unused,
                points.len()
            );
        }

        Ok(Self {
            points,
            half_edges,
            live_polygons: faces.len(),
            polygons: faces,
            edge_map,
            live_points,
            group: None,
            incidence: None,
        })
    }

    /// Positions of every point slot, dead ones included.
    pub fn positions(&self) -> Vec<DVec3> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Point lists of the live polygons, in polygon id order.
    pub fn polygon_lists(&self) -> Vec<Vec<u32>> {
        self.polygon_ids()
            .map(|poly| {
                self.polygon_points(poly)
                    .into_iter()
                    .map(|p| p.0)
                    .collect()
            })
            .collect()
    }
}
