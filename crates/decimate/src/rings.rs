//! Quad rings: chains of quads joined through opposite edges.
//!
//! Walking a quad "across" means leaving through the edge opposite the
//! one it was entered by. Every quad lies on two rings, one per pair of
//! opposite edges. Collapsing all transverse edges ("rungs") of a ring
//! removes its quads in one step and leaves the surrounding quad layout
//! intact.

use std::collections::HashSet;

use polyreduce_mesh::{HalfEdgeId, PointId, PolyMesh, PolygonId};

/// One ring of quads.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    /// Quads in walking order
    pub quads: Vec<PolygonId>,
    /// Transverse edges, one more than the quads for open rings
    pub rungs: Vec<(PointId, PointId)>,
    pub closed: bool,
    /// Passes through a quad twice
    pub self_crossing: bool,
    /// Smallest entry half-edge of the ring, identifying it
    pub seed: HalfEdgeId,
}

/// Whether a point breaks the regular quad pattern.
///
/// Interior points need exactly four quads around them; boundary points
/// at most two quads and nothing else.
pub fn is_knot(mesh: &PolyMesh, point: PointId) -> bool {
    let polygons = mesh.point_polygons(point);
    if polygons.iter().any(|&p| !mesh.is_quad(p)) {
        return true;
    }
    if mesh.is_boundary_point(point) {
        polygons.len() > 2
    } else {
        polygons.len() != 4
    }
}

fn live_quad(mesh: &PolyMesh, he: HalfEdgeId) -> bool {
    mesh.polygon_of(he).is_some_and(|p| mesh.is_quad(p))
}

fn opposite(mesh: &PolyMesh, he: HalfEdgeId) -> HalfEdgeId {
    mesh.next(mesh.next(he))
}

/// Entry edge of the next quad, leaving through the edge opposite `he`.
fn step(mesh: &PolyMesh, he: HalfEdgeId) -> Option<HalfEdgeId> {
    mesh.twin(opposite(mesh, he)).filter(|&t| live_quad(mesh, t))
}

/// Entry edge of the previous quad.
fn step_back(mesh: &PolyMesh, he: HalfEdgeId) -> Option<HalfEdgeId> {
    mesh.twin(he)
        .filter(|&t| live_quad(mesh, t))
        .map(|t| opposite(mesh, t))
}

/// Walk the ring entered through `entry`, which must lie in a live quad.
pub fn walk_ring(mesh: &PolyMesh, entry: HalfEdgeId) -> Option<Ring> {
    if !mesh.is_half_edge_alive(entry) || !live_quad(mesh, entry) {
        return None;
    }
    let limit = mesh.half_edge_capacity();

    // Rewind to the start of an open chain, or detect a cycle
    let mut start = entry;
    let mut closed = false;
    for _ in 0..limit {
        match step_back(mesh, start) {
            Some(prev) if prev == entry => {
                closed = true;
                break;
            }
            Some(prev) => start = prev,
            None => break,
        }
    }

    let mut entries = vec![start];
    let mut seen: HashSet<PolygonId> = HashSet::new();
    let mut self_crossing = false;
    if let Some(q) = mesh.polygon_of(start) {
        seen.insert(q);
    }
    let mut current = start;
    while entries.len() <= limit {
        let Some(next) = step(mesh, current) else {
            break;
        };
        if next == start {
            closed = true;
            break;
        }
        let Some(quad) = mesh.polygon_of(next) else {
            break;
        };
        if !seen.insert(quad) {
            self_crossing = true;
            break;
        }
        entries.push(next);
        current = next;
    }

    let quads: Vec<PolygonId> = entries.iter().filter_map(|&h| mesh.polygon_of(h)).collect();
    let mut rungs: Vec<(PointId, PointId)> = entries
        .iter()
        .map(|&h| (mesh.source_point(h), mesh.dest_point(h)))
        .collect();
    if !closed {
        let exit = opposite(mesh, current);
        rungs.push((mesh.source_point(exit), mesh.dest_point(exit)));
    }
    let seed = entries
        .iter()
        .flat_map(|&h| [h, opposite(mesh, h)])
        .min()
        .unwrap_or(entry);

    Some(Ring {
        quads,
        rungs,
        closed,
        self_crossing,
        seed,
    })
}

/// The ring through `entry`, walked from its seed.
///
/// Walking from different quads of one ring can start at either end; the
/// seed fixes the start, so two calls on an unchanged ring compare equal.
pub fn ring_at(mesh: &PolyMesh, entry: HalfEdgeId) -> Option<Ring> {
    let ring = walk_ring(mesh, entry)?;
    if ring.seed == entry {
        return Some(ring);
    }
    walk_ring(mesh, ring.seed)
}

/// Every ring of the mesh, each reported once, ordered by seed.
pub fn classify_rings(mesh: &PolyMesh) -> Vec<Ring> {
    let mut visited = vec![false; mesh.half_edge_capacity()];
    let mut rings = Vec::new();
    for poly in mesh.polygon_ids() {
        if !mesh.is_quad(poly) {
            continue;
        }
        for he in mesh.polygon_half_edges(poly).into_iter().take(2) {
            if visited[he.index()] {
                continue;
            }
            let Some(ring) = ring_at(mesh, he) else {
                continue;
            };
            for &quad in &ring.quads {
                // Mark the entry direction of this ring in each quad
                for h in mesh.polygon_half_edges(quad) {
                    let (a, b) = (mesh.source_point(h), mesh.dest_point(h));
                    if ring.rungs.contains(&(a, b)) || ring.rungs.contains(&(b, a)) {
                        visited[h.index()] = true;
                    }
                }
            }
            visited[he.index()] = true;
            visited[opposite(mesh, he).index()] = true;
            rings.push(ring);
        }
    }
    rings.sort_by_key(|r| r.seed);
    rings.dedup_by_key(|r| r.seed);
    rings
}

/// Rings that can be collapsed as a unit: at least two rungs, no shared
/// rung endpoints, no knots and no self-crossing.
pub fn is_collapsible(ring: &Ring, knots: &[bool]) -> bool {
    if ring.self_crossing || ring.rungs.len() < 2 {
        return false;
    }
    let mut points: Vec<PointId> = ring.rungs.iter().flat_map(|&(a, b)| [a, b]).collect();
    let count = points.len();
    points.sort_unstable();
    points.dedup();
    if points.len() != count {
        return false;
    }
    !points
        .iter()
        .any(|p| knots.get(p.index()).copied().unwrap_or(true))
}

/// Knot flags for every point slot.
pub fn find_knots(mesh: &PolyMesh) -> Vec<bool> {
    let mut knots = vec![false; mesh.point_capacity()];
    for point in mesh.point_ids() {
        knots[point.index()] = is_knot(mesh, point);
    }
    knots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_grid_rings() {
        let mesh = fixtures::quad_grid(3);
        let rings = classify_rings(&mesh);
        // Three rows and three columns
        assert_eq!(rings.len(), 6);
        for ring in &rings {
            assert_eq!(ring.quads.len(), 3);
            assert_eq!(ring.rungs.len(), 4);
            assert!(!ring.closed);
            assert!(!ring.self_crossing);
        }
        let mut covered: Vec<PolygonId> = rings.iter().flat_map(|r| r.quads.clone()).collect();
        covered.sort_unstable();
        covered.dedup();
        assert_eq!(covered.len(), 9);
    }

    #[test]
    fn test_walk_from_any_quad_finds_same_ring() {
        let mesh = fixtures::quad_grid(3);
        let first = mesh.find_half_edge(PointId(1), PointId(5)).unwrap();
        let last = mesh.find_half_edge(PointId(3), PointId(7)).unwrap();
        let a = walk_ring(&mesh, first).unwrap();
        let b = walk_ring(&mesh, last).unwrap();
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.quads.len(), 3);
        assert_eq!(ring_at(&mesh, first), ring_at(&mesh, last));
    }

    #[test]
    fn test_closed_ring() {
        let mesh = fixtures::quad_tube(4);
        let rings = classify_rings(&mesh);
        let closed: Vec<&Ring> = rings.iter().filter(|r| r.closed).collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].quads.len(), 4);
        assert_eq!(closed[0].rungs.len(), 4);
    }

    #[test]
    fn test_knots() {
        let grid = fixtures::quad_grid(3);
        assert!(find_knots(&grid).iter().all(|&k| !k));

        // Every point of a triangle mesh is a knot
        let square = fixtures::square();
        assert!(is_knot(&square, PointId(0)));

        let knots = find_knots(&grid);
        let rings = classify_rings(&grid);
        assert!(rings.iter().all(|r| is_collapsible(r, &knots)));
        let mut blocked = knots.clone();
        blocked[5] = true;
        assert!(rings.iter().any(|r| !is_collapsible(r, &blocked)));
    }
}
