//! Topology query methods for PolyMesh.

use glam::DVec3;

use super::group::Group;
use super::types::{HalfEdge, HalfEdgeId, Point, PointId, Polygon, PolygonId};
use super::PolyMesh;

impl PolyMesh {
    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get point by ID
    pub fn point(&self, id: PointId) -> Option<&Point> {
        self.points.get(id.index())
    }

    /// Get half-edge by ID
    pub fn half_edge(&self, id: HalfEdgeId) -> Option<&HalfEdge> {
        self.half_edges.get(id.index())
    }

    /// Get polygon by ID
    pub fn polygon(&self, id: PolygonId) -> Option<&Polygon> {
        self.polygons.get(id.index())
    }

    /// Number of live points
    pub fn num_points(&self) -> usize {
        self.live_points
    }

    /// Number of live polygons
    pub fn num_polygons(&self) -> usize {
        self.live_polygons
    }

    pub fn point_capacity(&self) -> usize {
        self.points.len()
    }

    pub fn half_edge_capacity(&self) -> usize {
        self.half_edges.len()
    }

    pub fn polygon_capacity(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_point_alive(&self, id: PointId) -> bool {
        self.point(id).is_some_and(|p| p.alive)
    }

    pub fn is_half_edge_alive(&self, id: HalfEdgeId) -> bool {
        self.half_edge(id).is_some_and(|h| h.polygon.is_some())
    }

    pub fn is_polygon_alive(&self, id: PolygonId) -> bool {
        self.polygon(id).is_some_and(|p| p.alive)
    }

    /// Live point ids in ascending order
    pub fn point_ids(&self) -> impl Iterator<Item = PointId> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.alive)
            .map(|(i, _)| PointId(i as u32))
    }

    /// Live polygon ids in ascending order
    pub fn polygon_ids(&self) -> impl Iterator<Item = PolygonId> + '_ {
        self.polygons
            .iter()
            .enumerate()
            .filter(|(_, p)| p.alive)
            .map(|(i, _)| PolygonId(i as u32))
    }

    /// Live half-edge ids in ascending order
    pub fn half_edge_ids(&self) -> impl Iterator<Item = HalfEdgeId> + '_ {
        self.half_edges
            .iter()
            .enumerate()
            .filter(|(_, h)| h.polygon.is_some())
            .map(|(i, _)| HalfEdgeId(i as u32))
    }

    /// One half-edge per undirected live edge: the boundary half-edge, or
    /// the lower id of a twin pair.
    pub fn edge_ids(&self) -> impl Iterator<Item = HalfEdgeId> + '_ {
        self.half_edge_ids()
            .filter(|&h| self.twin(h).is_none_or(|t| h < t))
    }

    pub fn position(&self, id: PointId) -> DVec3 {
        self.points[id.index()].position
    }

    // ========================================================================
    // Half-edge navigation
    // ========================================================================

    pub fn next(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.half_edges[he.index()].next
    }

    pub fn prev(&self, he: HalfEdgeId) -> HalfEdgeId {
        self.half_edges[he.index()].prev
    }

    pub fn twin(&self, he: HalfEdgeId) -> Option<HalfEdgeId> {
        self.half_edges[he.index()].twin
    }

    pub fn source_point(&self, he: HalfEdgeId) -> PointId {
        self.half_edges[he.index()].origin
    }

    pub fn dest_point(&self, he: HalfEdgeId) -> PointId {
        self.source_point(self.next(he))
    }

    pub fn polygon_of(&self, he: HalfEdgeId) -> Option<PolygonId> {
        self.half_edges[he.index()].polygon
    }

    /// Half-edge from `from` to `to`, if that directed edge exists.
    pub fn find_half_edge(&self, from: PointId, to: PointId) -> Option<HalfEdgeId> {
        self.edge_map.get(&(from, to)).copied()
    }

    /// Either half-edge joining `a` and `b`, preferring `a -> b`.
    pub fn find_edge(&self, a: PointId, b: PointId) -> Option<HalfEdgeId> {
        self.find_half_edge(a, b).or_else(|| self.find_half_edge(b, a))
    }

    pub fn is_boundary_edge(&self, he: HalfEdgeId) -> bool {
        self.twin(he).is_none()
    }

    // ========================================================================
    // Polygon queries
    // ========================================================================

    /// Half-edges of a polygon in winding order, starting at its anchor.
    pub fn polygon_half_edges(&self, poly: PolygonId) -> Vec<HalfEdgeId> {
        let mut result = Vec::new();
        let Some(polygon) = self.polygon(poly) else {
            return result;
        };
        if !polygon.alive {
            return result;
        }

        let start = polygon.half_edge;
        let mut current = start;
        loop {
            result.push(current);
            current = self.next(current);
            // Guard against corrupted cycles
            if current == start || result.len() > self.half_edges.len() {
                break;
            }
        }
        result
    }

    pub fn polygon_points(&self, poly: PolygonId) -> Vec<PointId> {
        self.polygon_half_edges(poly)
            .into_iter()
            .map(|h| self.source_point(h))
            .collect()
    }

    pub fn polygon_arity(&self, poly: PolygonId) -> usize {
        self.polygon_half_edges(poly).len()
    }

    pub fn is_quad(&self, poly: PolygonId) -> bool {
        self.polygon_arity(poly) == 4
    }

    pub fn is_triangle(&self, poly: PolygonId) -> bool {
        self.polygon_arity(poly) == 3
    }

    /// Newell normal of a polygon, scaled to twice its area.
    pub fn polygon_area_normal(&self, poly: PolygonId) -> DVec3 {
        let positions: Vec<DVec3> = self
            .polygon_points(poly)
            .into_iter()
            .map(|p| self.position(p))
            .collect();
        newell_normal(&positions)
    }

    /// Unit normal of a polygon (zero for degenerate polygons).
    pub fn polygon_normal(&self, poly: PolygonId) -> DVec3 {
        self.polygon_area_normal(poly).normalize_or_zero()
    }

    pub fn polygon_area(&self, poly: PolygonId) -> f64 {
        0.5 * self.polygon_area_normal(poly).length()
    }

    pub fn polygon_centroid(&self, poly: PolygonId) -> DVec3 {
        let points = self.polygon_points(poly);
        if points.is_empty() {
            return DVec3::ZERO;
        }
        let sum: DVec3 = points.iter().map(|&p| self.position(p)).sum();
        sum / points.len() as f64
    }

    // ========================================================================
    // Point neighbourhoods
    // ========================================================================

    /// Build the per-point outgoing half-edge cache.
    ///
    /// Queries work without it, but every point query then scans all
    /// half-edges. Topology edits keep the cache current once it exists.
    pub fn ensure_incidence(&mut self) {
        if self.incidence.is_some() {
            return;
        }
        let mut incidence = vec![Vec::new(); self.points.len()];
        for (i, he) in self.half_edges.iter().enumerate() {
            if he.polygon.is_some() {
                incidence[he.origin.index()].push(HalfEdgeId(i as u32));
            }
        }
        self.incidence = Some(incidence);
    }

    #[cfg(test)]
    pub(crate) fn has_incidence(&self) -> bool {
        self.incidence.is_some()
    }

    /// Live half-edges leaving `point`, in ascending id order.
    pub fn outgoing(&self, point: PointId) -> Vec<HalfEdgeId> {
        match &self.incidence {
            Some(incidence) => {
                let mut list = incidence
                    .get(point.index())
                    .cloned()
                    .unwrap_or_default();
                list.sort_unstable();
                list
            }
            None => self
                .half_edges
                .iter()
                .enumerate()
                .filter(|(_, h)| h.polygon.is_some() && h.origin == point)
                .map(|(i, _)| HalfEdgeId(i as u32))
                .collect(),
        }
    }

    /// Live half-edges arriving at `point`.
    pub fn incoming(&self, point: PointId) -> Vec<HalfEdgeId> {
        self.outgoing(point)
            .into_iter()
            .map(|h| self.prev(h))
            .collect()
    }

    /// Points sharing an edge with `point`, sorted and unique.
    pub fn neighbors(&self, point: PointId) -> Vec<PointId> {
        let mut result: Vec<PointId> = Vec::new();
        for h in self.outgoing(point) {
            result.push(self.dest_point(h));
            result.push(self.source_point(self.prev(h)));
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Polygons using `point`, sorted and unique.
    pub fn point_polygons(&self, point: PointId) -> Vec<PolygonId> {
        let mut result: Vec<PolygonId> = self
            .outgoing(point)
            .into_iter()
            .filter_map(|h| self.polygon_of(h))
            .collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    pub fn is_boundary_point(&self, point: PointId) -> bool {
        self.outgoing(point)
            .into_iter()
            .any(|h| self.twin(h).is_none() || self.twin(self.prev(h)).is_none())
    }

    /// True when no live half-edge lacks a twin.
    pub fn is_closed(&self) -> bool {
        self.half_edge_ids().all(|h| self.twin(h).is_some())
    }

    // ========================================================================
    // Working group
    // ========================================================================

    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }

    /// Restrict mutation to a subset of polygons (None lifts the restriction).
    pub fn set_group(&mut self, group: Option<Group>) {
        self.group = group;
    }

    pub fn in_group(&self, poly: PolygonId) -> bool {
        self.group.as_ref().is_none_or(|g| g.contains(poly))
    }

    /// A point is frozen when it touches a polygon outside the group.
    pub fn is_frozen(&self, point: PointId) -> bool {
        if self.group.is_none() {
            return false;
        }
        self.point_polygons(point)
            .into_iter()
            .any(|poly| !self.in_group(poly))
    }
}

/// Newell's method: robust normal for possibly non-planar polygons.
///
/// The length of the result is twice the (projected) polygon area.
pub fn newell_normal(positions: &[DVec3]) -> DVec3 {
    let n = positions.len();
    let mut normal = DVec3::ZERO;
    for i in 0..n {
        let a = positions[i];
        let b = positions[(i + 1) % n];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal
}
