//! Wedges: the attribute-continuous corner clusters around each point.
//!
//! For one channel, two corners of a point belong to the same wedge when
//! they are joined across an edge that is not a protected seam and carry
//! bitwise identical values. Partitions are always derived from the
//! current corner values, so a replay that writes the same values gets
//! the same wedges. [`WedgeModel`] caches the partition together with one
//! attribute quadric per wedge and component.

use std::collections::{HashMap, HashSet};

use polyreduce_mesh::{HalfEdgeId, PointId, PolyMesh};

use crate::attributes::CornerAttributes;
use crate::history::HistoryEvent;
use crate::quadric::{AttributeQuadric, attribute_gradient, to_vector};
use crate::real::Real;

/// Small union-find over local indices.
struct Sets {
    parent: Vec<usize>,
}

impl Sets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Union keeping the smaller root, so roots are deterministic.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    fn groups(&mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            let root = self.find(i);
            by_root[root].push(i);
        }
        by_root.into_iter().filter(|g| !g.is_empty()).collect()
    }
}

/// The corner of `he`'s twin polygon at the source of `he`.
fn across_source(mesh: &PolyMesh, he: HalfEdgeId) -> Option<HalfEdgeId> {
    mesh.twin(he).map(|t| mesh.next(t))
}

/// Corners of `point` grouped into wedges of `channel`.
///
/// Groups are sorted internally and ordered by their lowest corner.
pub fn point_wedges(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    channel: usize,
    point: PointId,
) -> Vec<Vec<HalfEdgeId>> {
    let corners = mesh.outgoing(point);
    let mut sets = Sets::new(corners.len());
    for (i, &corner) in corners.iter().enumerate() {
        // The edge point -> dest, seen from the neighbouring polygon
        let Some(other) = across_source(mesh, corner) else {
            continue;
        };
        if attrs.is_protected(channel, corner) || !attrs.values_equal(channel, corner, other) {
            continue;
        }
        if let Ok(j) = corners.binary_search(&other) {
            sets.union(i, j);
        }
    }
    // Roots are the smallest member and `corners` is sorted, so groups
    // already come out ordered by their lowest corner
    sets.groups()
        .into_iter()
        .map(|g| g.into_iter().map(|i| corners[i]).collect())
        .collect()
}

/// Wedges of one point merged by a collapse.
#[derive(Debug, Clone, Default)]
pub struct PairGroup {
    /// Indices into `WedgePairing::removed`
    pub removed: Vec<usize>,
    /// Indices into `WedgePairing::survivor`
    pub survivor: Vec<usize>,
    /// The first pair, whose values are interpolated
    pub seed: (usize, usize),
}

/// How the wedges of both endpoints line up across the collapsing edge.
#[derive(Debug, Clone)]
pub struct WedgePairing {
    pub removed: Vec<Vec<HalfEdgeId>>,
    pub survivor: Vec<Vec<HalfEdgeId>>,
    pub groups: Vec<PairGroup>,
}

impl WedgePairing {
    /// Groups that force two wedges of the same point together.
    pub fn conflicts(&self) -> impl Iterator<Item = &PairGroup> {
        self.groups
            .iter()
            .filter(|g| g.removed.len() > 1 || g.survivor.len() > 1)
    }

    pub fn is_paired_removed(&self, wedge: usize) -> bool {
        self.groups.iter().any(|g| g.removed.contains(&wedge))
    }

    pub fn is_paired_survivor(&self, wedge: usize) -> bool {
        self.groups.iter().any(|g| g.survivor.contains(&wedge))
    }
}

/// Corner pairs `(removed corner, survivor corner)` of the polygons on
/// either side of the edge, `removed -> survivor` side first.
pub fn edge_corner_pairs(
    mesh: &PolyMesh,
    removed: PointId,
    survivor: PointId,
) -> Vec<(HalfEdgeId, HalfEdgeId)> {
    let mut pairs = Vec::with_capacity(2);
    if let Some(h) = mesh.find_half_edge(removed, survivor) {
        pairs.push((h, mesh.next(h)));
    }
    if let Some(h) = mesh.find_half_edge(survivor, removed) {
        pairs.push((mesh.next(h), h));
    }
    pairs
}

/// Match the wedges of `removed` and `survivor` through the polygons
/// sharing their edge.
pub fn pair_wedges(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    channel: usize,
    removed: PointId,
    survivor: PointId,
) -> WedgePairing {
    let removed_wedges = point_wedges(mesh, attrs, channel, removed);
    let survivor_wedges = point_wedges(mesh, attrs, channel, survivor);
    let locate = |wedges: &[Vec<HalfEdgeId>], corner: HalfEdgeId| {
        wedges.iter().position(|w| w.binary_search(&corner).is_ok())
    };

    let nr = removed_wedges.len();
    let mut sets = Sets::new(nr + survivor_wedges.len());
    let mut pairs = Vec::new();
    for (rc, sc) in edge_corner_pairs(mesh, removed, survivor) {
        if let (Some(rw), Some(sw)) = (locate(&removed_wedges, rc), locate(&survivor_wedges, sc)) {
            sets.union(rw, nr + sw);
            pairs.push((rw, sw));
        }
    }

    let mut groups: Vec<PairGroup> = Vec::new();
    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    for &(rw, sw) in &pairs {
        let root = sets.find(rw);
        let idx = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(PairGroup {
                seed: (rw, sw),
                ..PairGroup::default()
            });
            groups.len() - 1
        });
        let group = &mut groups[idx];
        if !group.removed.contains(&rw) {
            group.removed.push(rw);
        }
        if !group.survivor.contains(&sw) {
            group.survivor.push(sw);
        }
    }

    WedgePairing {
        removed: removed_wedges,
        survivor: survivor_wedges,
        groups,
    }
}

/// New values one channel receives from a collapse.
#[derive(Debug, Clone)]
pub struct ValueWrite {
    pub channel: usize,
    pub corners: Vec<HalfEdgeId>,
    pub value: Vec<f64>,
}

/// A pair group merging wedges that must stay apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WedgeConflict {
    pub channel: usize,
    /// The channel protects a seam at one of the endpoints
    pub protected: bool,
}

/// Attribute side effects of collapsing `removed` into `survivor`.
#[derive(Debug, Clone, Default)]
pub struct AttributePlan {
    pub writes: Vec<ValueWrite>,
    pub conflicts: Vec<WedgeConflict>,
}

impl AttributePlan {
    #[cfg(test)]
    fn has_protected_conflict(&self) -> bool {
        self.conflicts.iter().any(|c| c.protected)
    }

    pub fn apply(&self, attrs: &mut CornerAttributes) {
        for write in &self.writes {
            for &corner in &write.corners {
                attrs.set_value(write.channel, corner, &write.value);
            }
        }
    }
}

/// Plan the attribute values after collapsing `removed` into `survivor`.
///
/// Every pair group takes `lerp(removed value, survivor value, bias)` of
/// its seed pair. Wedges not touching the edge keep their values.
pub fn plan_collapse(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    removed: PointId,
    survivor: PointId,
    bias: f64,
) -> AttributePlan {
    let mut plan = AttributePlan::default();
    for channel in 0..attrs.channel_count() {
        let pairing = pair_wedges(mesh, attrs, channel, removed, survivor);
        let mut seam_at_ends = None;
        for group in &pairing.groups {
            let (rw, sw) = group.seed;
            let from = attrs.value(channel, pairing.removed[rw][0]);
            let to = attrs.value(channel, pairing.survivor[sw][0]);
            let value: Vec<f64> = from
                .iter()
                .zip(to)
                .map(|(a, b)| a + (b - a) * bias)
                .collect();

            let mut corners = Vec::new();
            for &w in &group.removed {
                corners.extend_from_slice(&pairing.removed[w]);
            }
            for &w in &group.survivor {
                corners.extend_from_slice(&pairing.survivor[w]);
            }

            if group.removed.len() > 1 || group.survivor.len() > 1 {
                let protected = *seam_at_ends.get_or_insert_with(|| {
                    attrs.point_on_protected_seam(mesh, channel, removed)
                        || attrs.point_on_protected_seam(mesh, channel, survivor)
                });
                plan.conflicts.push(WedgeConflict { channel, protected });
            }
            plan.writes.push(ValueWrite {
                channel,
                corners,
                value,
            });
        }
    }
    plan
}

/// One wedge of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Wedge<T: Real> {
    pub point: PointId,
    /// One accumulator per channel component
    pub quadrics: Vec<AttributeQuadric<T>>,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct ChannelWedges<T: Real> {
    corner_wedge: Vec<Option<u32>>,
    wedges: Vec<Wedge<T>>,
    /// Dead wedge slots, reused before the arena grows
    free: Vec<u32>,
    /// While an undo is open, free slots below this length stay untouched
    hold: Option<usize>,
}

impl<T: Real> ChannelWedges<T> {
    fn allocate(&mut self, wedge: Wedge<T>) -> u32 {
        let reused = if self.free.len() > self.hold.unwrap_or(0) {
            self.free.pop()
        } else {
            None
        };
        match reused {
            Some(id) => {
                self.wedges[id as usize] = wedge;
                id
            }
            None => {
                self.wedges.push(wedge);
                (self.wedges.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, id: u32) {
        let wedge = &mut self.wedges[id as usize];
        if wedge.alive {
            wedge.alive = false;
            wedge.quadrics.clear();
            self.free.push(id);
        }
    }
}

/// Wedge partitions of every channel plus their attribute quadrics.
#[derive(Debug, Clone, PartialEq)]
pub struct WedgeModel<T: Real> {
    channels: Vec<ChannelWedges<T>>,
}

#[derive(Debug, Clone)]
struct ChannelUndo<T: Real> {
    arena: usize,
    free: usize,
    corners: Vec<(HalfEdgeId, Option<u32>)>,
    wedges: Vec<(u32, Wedge<T>)>,
    seen_corners: HashSet<HalfEdgeId>,
    seen_wedges: HashSet<u32>,
}

/// Wedge slots saved before speculative collapses, opened with
/// [`WedgeModel::begin_undo`].
#[derive(Debug, Clone)]
pub struct WedgeUndo<T: Real> {
    channels: Vec<ChannelUndo<T>>,
}

impl<T: Real> WedgeModel<T> {
    /// Partition every point and accumulate the attribute fits of the
    /// triangles around each wedge.
    ///
    /// Polygons with more than three corners are fanned from their first
    /// corner for the fit only. Triangles too thin for a fit contribute
    /// nothing.
    pub fn build(mesh: &PolyMesh, attrs: &CornerAttributes) -> Self {
        let mut channels = Vec::with_capacity(attrs.channel_count());
        for (channel, state) in attrs.channels().iter().enumerate() {
            let mut model = ChannelWedges {
                corner_wedge: vec![None; mesh.half_edge_capacity()],
                wedges: Vec::new(),
                free: Vec::new(),
                hold: None,
            };
            for point in mesh.point_ids() {
                for group in point_wedges(mesh, attrs, channel, point) {
                    let id = model.wedges.len() as u32;
                    for &corner in &group {
                        model.corner_wedge[corner.index()] = Some(id);
                    }
                    model.wedges.push(Wedge {
                        point,
                        quadrics: vec![AttributeQuadric::default(); state.dimension],
                        alive: true,
                    });
                }
            }

            if state.active {
                for poly in mesh.polygon_ids() {
                    let corners = mesh.polygon_half_edges(poly);
                    for i in 1..corners.len().saturating_sub(1) {
                        let tri = [corners[0], corners[i], corners[i + 1]];
                        accumulate_triangle(mesh, attrs, channel, &tri, &mut model);
                    }
                }
            }
            channels.push(model);
        }
        Self { channels }
    }

    pub fn wedge_of(&self, channel: usize, corner: HalfEdgeId) -> Option<u32> {
        self.channels[channel].corner_wedge[corner.index()]
    }

    #[cfg(test)]
    pub fn wedge(&self, channel: usize, id: u32) -> &Wedge<T> {
        &self.channels[channel].wedges[id as usize]
    }

    /// Distinct wedges around a live point.
    pub fn wedge_count(&self, mesh: &PolyMesh, channel: usize, point: PointId) -> usize {
        let mut ids: Vec<u32> = mesh
            .outgoing(point)
            .into_iter()
            .filter_map(|c| self.wedge_of(channel, c))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Sum of the quadrics of the wedges owning `corners`, each once.
    pub fn sum_quadrics(
        &self,
        channel: usize,
        wedges: impl IntoIterator<Item = HalfEdgeId>,
    ) -> Vec<AttributeQuadric<T>> {
        let model = &self.channels[channel];
        let mut seen: Vec<u32> = wedges
            .into_iter()
            .filter_map(|c| model.corner_wedge[c.index()])
            .collect();
        seen.sort_unstable();
        seen.dedup();
        let dim = seen
            .first()
            .map(|&id| model.wedges[id as usize].quadrics.len())
            .unwrap_or(0);
        let mut total = vec![AttributeQuadric::default(); dim];
        for id in seen {
            for (acc, q) in total.iter_mut().zip(&model.wedges[id as usize].quadrics) {
                *acc += q;
            }
        }
        total
    }

    /// Coalesce wedges on both ends of `he` whose values agree within
    /// `tolerance` but not exactly.
    ///
    /// The wedge across the edge is snapped to the value on `he`'s side,
    /// one vertex-merge event per rewritten corner, and the partition of
    /// the point is rebuilt so the two wedges share one quadric.
    pub fn merge_across_edge(
        &mut self,
        mesh: &PolyMesh,
        attrs: &mut CornerAttributes,
        he: HalfEdgeId,
        tolerance: f64,
        events: &mut Vec<HistoryEvent>,
    ) {
        let Some(twin) = mesh.twin(he) else {
            return;
        };
        let ends = [
            (mesh.source_point(he), he, mesh.next(twin)),
            (mesh.dest_point(he), mesh.next(he), twin),
        ];
        for channel in 0..attrs.channel_count() {
            if attrs.is_protected(channel, he) {
                continue;
            }
            for &(point, keep, snap) in &ends {
                if attrs.values_equal(channel, keep, snap)
                    || !attrs.values_close(channel, keep, snap, tolerance)
                {
                    continue;
                }
                let value = attrs.value(channel, keep).to_vec();
                let group = point_wedges(mesh, attrs, channel, point)
                    .into_iter()
                    .find(|g| g.binary_search(&snap).is_ok())
                    .unwrap_or_default();
                for corner in group {
                    if !attrs.values_equal(channel, corner, keep) {
                        attrs.set_value(channel, corner, &value);
                        events.push(HistoryEvent::VertexMerge {
                            from: corner,
                            to: keep,
                            channel: channel as u32,
                        });
                    }
                }
                self.refresh_point(mesh, attrs, channel, point, &[]);
            }
        }
    }

    /// Rebuild the wedges of `point` from the current corner values.
    ///
    /// New wedges inherit the quadrics of the old wedges their corners
    /// belonged to, each old wedge counted once. `carry` lists wedges that
    /// lost all their corners together with a surviving corner whose new
    /// wedge absorbs their quadric. Slots freed here are only reused by
    /// later calls, so ids named in `carry` stay valid throughout.
    pub fn refresh_point(
        &mut self,
        mesh: &PolyMesh,
        attrs: &CornerAttributes,
        channel: usize,
        point: PointId,
        carry: &[(u32, HalfEdgeId)],
    ) {
        let groups = point_wedges(mesh, attrs, channel, point);
        let model = &mut self.channels[channel];
        let dim = attrs.channels()[channel].dimension;
        let mut consumed: Vec<u32> = Vec::new();

        for group in groups {
            let mut olds: Vec<u32> = group
                .iter()
                .filter_map(|c| model.corner_wedge[c.index()])
                .collect();
            olds.sort_unstable();
            olds.dedup();

            let mut quadrics = vec![AttributeQuadric::default(); dim];
            for &old in &olds {
                if consumed.contains(&old) {
                    continue;
                }
                consumed.push(old);
                for (acc, q) in quadrics.iter_mut().zip(&model.wedges[old as usize].quadrics) {
                    *acc += q;
                }
            }

            let id = model.allocate(Wedge {
                point,
                quadrics,
                alive: true,
            });
            for &corner in &group {
                model.corner_wedge[corner.index()] = Some(id);
            }
        }

        for &(old, anchor) in carry {
            if consumed.contains(&old) {
                continue;
            }
            let Some(target) = model.corner_wedge[anchor.index()] else {
                continue;
            };
            let orphan = model.wedges[old as usize].quadrics.clone();
            for (acc, q) in model.wedges[target as usize].quadrics.iter_mut().zip(&orphan) {
                *acc += q;
            }
            consumed.push(old);
        }

        for old in consumed {
            model.release(old);
        }
    }

    /// Start recording. Until [`WedgeModel::restore`] or
    /// [`WedgeModel::end_undo`], only slots freed after this call are
    /// reused.
    pub fn begin_undo(&mut self) -> WedgeUndo<T> {
        let channels = self
            .channels
            .iter_mut()
            .map(|model| {
                model.hold = Some(model.free.len());
                ChannelUndo {
                    arena: model.wedges.len(),
                    free: model.free.len(),
                    corners: Vec::new(),
                    wedges: Vec::new(),
                    seen_corners: HashSet::new(),
                    seen_wedges: HashSet::new(),
                }
            })
            .collect();
        WedgeUndo { channels }
    }

    /// Save the wedge of each corner and the wedge record itself, once.
    pub fn capture(&self, undo: &mut WedgeUndo<T>, corners: &[HalfEdgeId]) {
        for (model, saved) in self.channels.iter().zip(&mut undo.channels) {
            for &corner in corners {
                if !saved.seen_corners.insert(corner) {
                    continue;
                }
                let id = model.corner_wedge[corner.index()];
                saved.corners.push((corner, id));
                if let Some(id) = id.filter(|&id| (id as usize) < saved.arena) {
                    if saved.seen_wedges.insert(id) {
                        saved.wedges.push((id, model.wedges[id as usize].clone()));
                    }
                }
            }
        }
    }

    pub fn restore(&mut self, undo: WedgeUndo<T>) {
        for (model, saved) in self.channels.iter_mut().zip(undo.channels) {
            for (corner, id) in saved.corners {
                model.corner_wedge[corner.index()] = id;
            }
            model.wedges.truncate(saved.arena);
            for (id, wedge) in saved.wedges {
                model.wedges[id as usize] = wedge;
            }
            model.free.truncate(saved.free);
            model.hold = None;
        }
    }

    /// Keep everything written since `begin_undo`.
    pub fn end_undo(&mut self) {
        for model in &mut self.channels {
            model.hold = None;
        }
    }

    #[cfg(test)]
    fn live_wedges(&self, channel: usize) -> usize {
        self.channels[channel].wedges.iter().filter(|w| w.alive).count()
    }

    #[cfg(test)]
    fn wedge_slots(&self, channel: usize) -> usize {
        self.channels[channel].wedges.len()
    }
}

fn accumulate_triangle<T: Real>(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    channel: usize,
    tri: &[HalfEdgeId; 3],
    model: &mut ChannelWedges<T>,
) {
    let positions = tri.map(|c| mesh.position(mesh.source_point(c)));
    let area_normal = (positions[1] - positions[0]).cross(positions[2] - positions[0]);
    let area = 0.5 * area_normal.length();
    if area <= 0.0 || !area.is_finite() {
        return;
    }
    let normal = to_vector::<T>(area_normal / (2.0 * area));
    let points = positions.map(to_vector::<T>);
    let weight = T::lit(area);

    let dim = attrs.channels()[channel].dimension;
    for k in 0..dim {
        let values = tri.map(|c| T::lit(attrs.value(channel, c)[k]));
        let Some((gradient, offset)) = attribute_gradient(&points, &normal, values) else {
            continue;
        };
        for &corner in tri {
            if let Some(id) = model.corner_wedge[corner.index()] {
                model.wedges[id as usize].quadrics[k].add_fit(&gradient, offset, weight);
            }
        }
    }
}
