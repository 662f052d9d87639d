//! Capture and restore of the slots a run of contractions rewrites.
//!
//! Callers capture the [`Region`] of each contraction before applying it;
//! every slot is saved the first time it is seen, so restoring brings the
//! mesh back to its state before the first capture.

use std::collections::HashSet;

use super::PolyMesh;
use super::types::{HalfEdge, HalfEdgeId, Point, PointId, Polygon, PolygonId};

/// Slots a contraction of one edge may rewrite.
#[derive(Debug, Clone, Default)]
pub struct Region {
    /// Both endpoints and their neighbours
    pub points: Vec<PointId>,
    /// Every live polygon touching `points`
    pub polygons: Vec<PolygonId>,
    /// The corners of `polygons` and their twins
    pub half_edges: Vec<HalfEdgeId>,
}

/// Saved slots of a mesh, restored by [`PolyMesh::restore`].
#[derive(Debug, Clone, Default)]
pub struct MeshUndo {
    points: Vec<(PointId, Point, Option<Vec<HalfEdgeId>>)>,
    half_edges: Vec<(HalfEdgeId, HalfEdge)>,
    polygons: Vec<(PolygonId, Polygon)>,
    counts: Option<(usize, usize)>,
    seen_points: HashSet<PointId>,
    seen_half_edges: HashSet<HalfEdgeId>,
    seen_polygons: HashSet<PolygonId>,
}

impl PolyMesh {
    /// The slots touched by contracting the edge between `a` and `b`,
    /// in either direction.
    pub fn contraction_region(&self, a: PointId, b: PointId) -> Region {
        let mut points = vec![a, b];
        points.extend(self.neighbors(a));
        points.extend(self.neighbors(b));
        points.sort_unstable();
        points.dedup();

        let mut polygons: Vec<PolygonId> = points
            .iter()
            .flat_map(|&p| self.point_polygons(p))
            .collect();
        polygons.sort_unstable();
        polygons.dedup();

        let mut half_edges = Vec::new();
        for &poly in &polygons {
            for h in self.polygon_half_edges(poly) {
                half_edges.push(h);
                half_edges.extend(self.twin(h));
            }
        }
        half_edges.sort_unstable();
        half_edges.dedup();

        Region {
            points,
            polygons,
            half_edges,
        }
    }

    /// Save every slot of `region` that `undo` has not seen yet.
    pub fn capture(&self, region: &Region, undo: &mut MeshUndo) {
        if undo.counts.is_none() {
            undo.counts = Some((self.live_points, self.live_polygons));
        }
        for &p in &region.points {
            if undo.seen_points.insert(p) {
                let incidence = self
                    .incidence
                    .as_ref()
                    .map(|lists| lists[p.index()].clone());
                undo.points.push((p, self.points[p.index()].clone(), incidence));
            }
        }
        for &poly in &region.polygons {
            if undo.seen_polygons.insert(poly) {
                undo.polygons.push((poly, self.polygons[poly.index()].clone()));
            }
        }
        for &h in &region.half_edges {
            if undo.seen_half_edges.insert(h) {
                undo.half_edges.push((h, self.half_edges[h.index()].clone()));
            }
        }
    }

    /// Put back every slot saved in `undo`, edge keys included.
    pub fn restore(&mut self, undo: MeshUndo) {
        let Some((live_points, live_polygons)) = undo.counts else {
            return;
        };

        // Keys are read off the current links before any record is restored
        let current: Vec<((PointId, PointId), HalfEdgeId)> = undo
            .half_edges
            .iter()
            .filter(|(h, _)| self.is_half_edge_alive(*h))
            .map(|&(h, _)| ((self.source_point(h), self.dest_point(h)), h))
            .collect();
        for (key, h) in current {
            if self.edge_map.get(&key) == Some(&h) {
                self.edge_map.remove(&key);
            }
        }

        for (p, point, incidence) in undo.points {
            self.points[p.index()] = point;
            if let (Some(lists), Some(saved)) = (self.incidence.as_mut(), incidence) {
                lists[p.index()] = saved;
            }
        }
        for (poly, polygon) in undo.polygons {
            self.polygons[poly.index()] = polygon;
        }
        for (h, record) in &undo.half_edges {
            self.half_edges[h.index()] = record.clone();
        }
        for (h, record) in &undo.half_edges {
            if record.polygon.is_some() {
                let dest = self.half_edges[record.next.index()].origin;
                self.edge_map.insert((record.origin, dest), *h);
            }
        }

        self.live_points = live_points;
        self.live_polygons = live_polygons;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckMode;
    use glam::DVec3;

    /// Two rows of quads, three points wide.
    fn quad_strip() -> PolyMesh {
        let positions: Vec<DVec3> = (0..9)
            .map(|i| DVec3::new((i % 3) as f64, (i / 3) as f64, 0.0))
            .collect();
        PolyMesh::from_polygons(
            &positions,
            &[vec![0, 1, 4, 3], vec![1, 2, 5, 4], vec![3, 4, 7, 6], vec![4, 5, 8, 7]],
        )
        .unwrap()
    }

    #[test]
    fn test_restore_undoes_contractions() {
        let mut mesh = quad_strip();
        mesh.ensure_incidence();
        let before = mesh.clone();
        let mut undo = MeshUndo::default();

        for (removed, survivor) in [(4, 1), (7, 6)] {
            let (removed, survivor) = (PointId(removed), PointId(survivor));
            mesh.capture(&mesh.contraction_region(removed, survivor), &mut undo);
            let he = mesh.find_half_edge(removed, survivor).unwrap();
            mesh.contract(he, true, CheckMode::Full).unwrap();
            mesh.set_position(survivor, DVec3::new(0.5, 0.5, 0.0));
        }
        assert_eq!(mesh.num_points(), 7);
        assert_ne!(mesh, before);

        mesh.restore(undo);
        assert_eq!(mesh, before);
        assert!(mesh.validate().is_ok());
        assert!(mesh.find_half_edge(PointId(4), PointId(1)).is_some());
    }

    #[test]
    fn test_capture_keeps_first_image() {
        let mut mesh = quad_strip();
        mesh.ensure_incidence();
        let before = mesh.clone();
        let mut undo = MeshUndo::default();

        let region = mesh.contraction_region(PointId(4), PointId(5));
        assert!(region.points.contains(&PointId(1)));
        assert_eq!(region.polygons.len(), 4);
        mesh.capture(&region, &mut undo);
        mesh.set_position(PointId(5), DVec3::new(3.0, 3.0, 3.0));
        // A second capture of the moved point must not replace the saved one
        mesh.capture(&region, &mut undo);

        mesh.restore(undo);
        assert_eq!(mesh, before);
    }
}
