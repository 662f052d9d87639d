//! Topology surgery for PolyMesh.
//!
//! Every operation validates first and only then mutates, so a refused
//! operation leaves the mesh untouched.

use glam::DVec3;
use std::collections::HashMap;
use tracing::trace;

use super::types::{
    CheckMode, ContractError, Contraction, HalfEdgeId, MeshError, PointId, PolygonId,
};
use super::PolyMesh;

/// Result of mesh compaction - maps old IDs to new IDs.
///
/// Decimation leaves dead points, half-edges and polygons in the arenas.
/// Compaction copies the live elements into dense arenas and records where
/// each one went.
#[derive(Debug, Default)]
pub struct CompactionMap {
    pub point_map: HashMap<PointId, PointId>,
    pub half_edge_map: HashMap<HalfEdgeId, HalfEdgeId>,
    pub polygon_map: HashMap<PolygonId, PolygonId>,
}

impl PolyMesh {
    /// Set the position of a point
    pub fn set_position(&mut self, point: PointId, position: DVec3) {
        if let Some(p) = self.points.get_mut(point.index()) {
            p.position = position;
        }
    }

    /// Resolve the (removed, survivor) pair for a collapse of `he`.
    fn contraction_ends(
        &self,
        he: HalfEdgeId,
        onto_destination: bool,
    ) -> Result<(PointId, PointId), ContractError> {
        if !self.is_half_edge_alive(he) {
            return Err(ContractError::Dead);
        }
        let src = self.source_point(he);
        let dst = self.dest_point(he);
        if !self.is_point_alive(src) || !self.is_point_alive(dst) {
            return Err(ContractError::Dead);
        }
        if onto_destination {
            Ok((src, dst))
        } else {
            Ok((dst, src))
        }
    }

    /// Check whether collapsing `he` would keep the mesh manifold.
    ///
    /// With `onto_destination` the source point is removed and the
    /// destination survives; otherwise the roles are swapped.
    pub fn can_contract(&self, he: HalfEdgeId, onto_destination: bool) -> Result<(), ContractError> {
        let (removed, survivor) = self.contraction_ends(he, onto_destination)?;
        self.check_contraction(removed, survivor)
    }

    fn check_contraction(&self, removed: PointId, survivor: PointId) -> Result<(), ContractError> {
        if self.is_frozen(removed) {
            return Err(ContractError::Frozen);
        }

        let edge_hes: Vec<HalfEdgeId> = [
            self.find_half_edge(removed, survivor),
            self.find_half_edge(survivor, removed),
        ]
        .into_iter()
        .flatten()
        .collect();
        if edge_hes.is_empty() {
            return Err(ContractError::Dead);
        }
        let edge_polys: Vec<PolygonId> = edge_hes
            .iter()
            .filter_map(|&h| self.polygon_of(h))
            .collect();

        // Polygons that shrink to two corners and vanish
        let doomed: Vec<PolygonId> = edge_polys
            .iter()
            .copied()
            .filter(|&p| self.polygon_arity(p) == 3)
            .collect();
        let opposite: Vec<PointId> = edge_hes
            .iter()
            .filter(|&&h| self.polygon_of(h).is_some_and(|p| doomed.contains(&p)))
            .map(|&h| self.source_point(self.prev(h)))
            .collect();

        let polys_removed = self.point_polygons(removed);
        let polys_survivor = self.point_polygons(survivor);

        // ===== Disconnect: every point keeps at least one polygon =====
        let mut fan: Vec<PolygonId> = polys_removed
            .iter()
            .chain(polys_survivor.iter())
            .copied()
            .filter(|p| !doomed.contains(p))
            .collect();
        fan.sort_unstable();
        fan.dedup();
        if fan.is_empty() {
            return Err(ContractError::Disconnect);
        }
        for &x in &opposite {
            if self
                .point_polygons(x)
                .iter()
                .all(|p| doomed.contains(p))
            {
                return Err(ContractError::Disconnect);
            }
        }

        // ===== Boundary loops may only merge along a boundary edge =====
        let boundary_edge = edge_hes.len() == 1;
        if !boundary_edge && self.is_boundary_point(removed) && self.is_boundary_point(survivor) {
            return Err(ContractError::BoundaryLoopMerge);
        }

        // ===== Pinch: a polygon holding both points away from the edge =====
        for p in &polys_removed {
            if polys_survivor.contains(p) && !edge_polys.contains(p) {
                return Err(ContractError::Pinch);
            }
        }

        // ===== Link condition =====
        let survivor_ring = self.neighbors(survivor);
        for x in self.neighbors(removed) {
            if x == survivor || !survivor_ring.contains(&x) {
                continue;
            }
            if !opposite.contains(&x) {
                return Err(ContractError::LinkCondition);
            }
        }

        // ===== Duplicate polygons after renaming =====
        let mut seen: Vec<Vec<PointId>> = Vec::with_capacity(fan.len());
        for &poly in &fan {
            let mut key: Vec<PointId> = self
                .polygon_points(poly)
                .into_iter()
                .map(|p| if p == removed { survivor } else { p })
                .collect();
            key.sort_unstable();
            key.dedup();
            if seen.contains(&key) {
                return Err(ContractError::DuplicatePolygon);
            }
            seen.push(key);
        }

        Ok(())
    }

    /// Collapse the edge of `he`, merging its endpoints.
    ///
    /// The removed point's half-edges are relinked to the survivor and
    /// polygons left with two corners are deleted, their outer neighbours
    /// becoming twins. The survivor keeps its position; callers move it.
    ///
    /// `CheckMode::Skip` trusts an earlier `can_contract` on the same state.
    pub fn contract(
        &mut self,
        he: HalfEdgeId,
        onto_destination: bool,
        check: CheckMode,
    ) -> Result<Contraction, ContractError> {
        // ===== PHASE 1: GATHER (read-only, fail early) =====
        let (removed, survivor) = self.contraction_ends(he, onto_destination)?;
        if check == CheckMode::Full {
            self.check_contraction(removed, survivor)?;
        }
        self.ensure_incidence();

        let edge_hes: Vec<HalfEdgeId> = [
            self.find_half_edge(removed, survivor),
            self.find_half_edge(survivor, removed),
        ]
        .into_iter()
        .flatten()
        .collect();

        // Every half-edge whose directed key can change
        let mut affected: Vec<HalfEdgeId> = Vec::new();
        for point in [removed, survivor] {
            affected.extend(self.outgoing(point));
            affected.extend(self.incoming(point));
        }
        affected.sort_unstable();
        affected.dedup();

        let mut origins: Vec<PointId> = affected.iter().map(|&h| self.source_point(h)).collect();
        origins.sort_unstable();
        origins.dedup();

        for &h in &affected {
            let key = (self.source_point(h), self.dest_point(h));
            self.edge_map.remove(&key);
        }

        trace!(
            "contract: removing {:?} onto {:?} ({} edge half-edges)",
            removed,
            survivor,
            edge_hes.len()
        );

        // ===== PHASE 2: UNLINK the collapsed edge from its polygons =====
        let mut touched: Vec<PolygonId> = Vec::new();
        for &h in &edge_hes {
            if let Some(poly) = self.polygon_of(h) {
                touched.push(poly);
            }
            self.unlink_half_edge(h);
        }

        // ===== PHASE 3: DELETE polygons left with two corners =====
        let mut deleted_polygons = Vec::new();
        let mut stitched = Vec::new();
        for poly in touched {
            let anchor = self.polygons[poly.index()].half_edge;
            let second = self.next(anchor);
            if self.next(second) != anchor {
                continue;
            }

            let t1 = self.twin(anchor);
            let t2 = self.twin(second);
            for h in [anchor, second] {
                let record = &mut self.half_edges[h.index()];
                record.polygon = None;
                record.twin = None;
            }
            if let Some(t1) = t1 {
                self.half_edges[t1.index()].twin = t2;
            }
            if let Some(t2) = t2 {
                self.half_edges[t2.index()].twin = t1;
            }

            self.polygons[poly.index()].alive = false;
            self.live_polygons -= 1;
            deleted_polygons.push(poly);
            stitched.push((t1, t2));
            trace!("contract: deleted degenerate polygon {:?}", poly);
        }

        // ===== PHASE 4: RENAME the removed point and rebuild edge keys =====
        for &h in &affected {
            let record = &mut self.half_edges[h.index()];
            if record.polygon.is_some() && record.origin == removed {
                record.origin = survivor;
            }
        }
        for &h in &affected {
            if !self.is_half_edge_alive(h) {
                continue;
            }
            let key = (self.source_point(h), self.dest_point(h));
            let previous = self.edge_map.insert(key, h);
            debug_assert!(previous.is_none(), "duplicate directed edge {:?}", key);
        }

        if let Some(incidence) = self.incidence.as_mut() {
            let moved = std::mem::take(&mut incidence[removed.index()]);
            incidence[survivor.index()].extend(moved);
            for point in origins.iter().chain(std::iter::once(&survivor)) {
                let half_edges = &self.half_edges;
                incidence[point.index()].retain(|h| half_edges[h.index()].polygon.is_some());
            }
        }

        self.points[removed.index()].alive = false;
        self.live_points -= 1;

        Ok(Contraction {
            survivor,
            removed,
            deleted_polygons,
            stitched,
        })
    }

    /// Splice a half-edge out of its polygon cycle and mark it dead.
    fn unlink_half_edge(&mut self, h: HalfEdgeId) {
        let record = self.half_edges[h.index()].clone();
        self.half_edges[record.prev.index()].next = record.next;
        self.half_edges[record.next.index()].prev = record.prev;
        if let Some(poly) = record.polygon {
            if self.polygons[poly.index()].half_edge == h {
                self.polygons[poly.index()].half_edge = record.next;
            }
        }
        if let Some(twin) = record.twin {
            if self.half_edges[twin.index()].twin == Some(h) {
                self.half_edges[twin.index()].twin = None;
            }
        }
        let record = &mut self.half_edges[h.index()];
        record.polygon = None;
        record.twin = None;
    }

    /// Remove an interior edge, merging its two polygons.
    ///
    /// The polygon owning `he` survives and absorbs the other one. Refused
    /// on boundary edges, outside the working group, and when the polygons
    /// touch anywhere other than this edge.
    pub fn dissolve(&mut self, he: HalfEdgeId) -> Result<PolygonId, ContractError> {
        if !self.is_half_edge_alive(he) {
            return Err(ContractError::Dead);
        }
        let twin = self.twin(he).ok_or(ContractError::BoundaryEdge)?;
        let (Some(keep), Some(absorb)) = (self.polygon_of(he), self.polygon_of(twin)) else {
            return Err(ContractError::Dead);
        };
        if keep == absorb {
            return Err(ContractError::SharedEdges);
        }
        if !self.in_group(keep) || !self.in_group(absorb) {
            return Err(ContractError::Frozen);
        }

        let shared = self
            .polygon_half_edges(keep)
            .into_iter()
            .filter(|&h| self.twin(h).and_then(|t| self.polygon_of(t)) == Some(absorb))
            .count();
        if shared > 1 {
            return Err(ContractError::SharedEdges);
        }
        let keep_points = self.polygon_points(keep);
        let common = self
            .polygon_points(absorb)
            .into_iter()
            .filter(|p| keep_points.contains(p))
            .count();
        if common > 2 {
            return Err(ContractError::Pinch);
        }

        self.ensure_incidence();
        let a = self.source_point(he);
        let b = self.dest_point(he);
        self.edge_map.remove(&(a, b));
        self.edge_map.remove(&(b, a));

        let (hn, hp) = (self.next(he), self.prev(he));
        let (tn, tp) = (self.next(twin), self.prev(twin));
        self.half_edges[hp.index()].next = tn;
        self.half_edges[tn.index()].prev = hp;
        self.half_edges[tp.index()].next = hn;
        self.half_edges[hn.index()].prev = tp;

        for h in [he, twin] {
            let record = &mut self.half_edges[h.index()];
            record.polygon = None;
            record.twin = None;
        }

        self.polygons[keep.index()].half_edge = hn;
        let mut current = hn;
        loop {
            self.half_edges[current.index()].polygon = Some(keep);
            current = self.next(current);
            if current == hn {
                break;
            }
        }
        self.polygons[absorb.index()].alive = false;
        self.live_polygons -= 1;

        if let Some(incidence) = self.incidence.as_mut() {
            for point in [a, b] {
                incidence[point.index()].retain(|&h| h != he && h != twin);
            }
        }

        trace!("dissolve: merged {:?} into {:?}", absorb, keep);
        Ok(keep)
    }

    /// Copy the live elements into dense arenas.
    ///
    /// The working group is not carried over.
    pub fn compact(&self) -> Result<(PolyMesh, CompactionMap), MeshError> {
        let mut map = CompactionMap::default();
        let mut positions = Vec::with_capacity(self.live_points);
        for p in self.point_ids() {
            map.point_map.insert(p, PointId(positions.len() as u32));
            positions.push(self.position(p));
        }

        let mut lists: Vec<Vec<u32>> = Vec::with_capacity(self.live_polygons);
        let mut corner = 0u32;
        for poly in self.polygon_ids() {
            map.polygon_map.insert(poly, PolygonId(lists.len() as u32));
            let mut list = Vec::new();
            for h in self.polygon_half_edges(poly) {
                map.half_edge_map.insert(h, HalfEdgeId(corner));
                corner += 1;
                let old = self.source_point(h);
                let new = map.point_map.get(&old).copied().ok_or_else(|| {
                    MeshError::InvalidTopology(format!("live polygon uses dead point {:?}", old))
                })?;
                list.push(new.0);
            }
            lists.push(list);
        }

        let mesh = PolyMesh::from_polygons(&positions, &lists)?;
        Ok((mesh, map))
    }
}
