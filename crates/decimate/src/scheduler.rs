//! Candidate bookkeeping for the collapse loop.
//!
//! Candidates live in slab slots; the queue orders slot handles by key. Edge
//! candidates are indexed by their unordered point pair so a collapse can
//! re-key every edge around the survivor in place. Each candidate keeps
//! the generation stamps of the points its cost was computed from; a
//! candidate popped after one of them was bumped is stale and gets
//! recomputed instead of applied.

use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};

use polyreduce_mesh::{HalfEdgeId, PointId};
use priority_queue::PriorityQueue;

use crate::constraints::edge_key;
use crate::rings::Ring;

const RANK_RING: u8 = 0;
const RANK_EDGE: u8 = 1;

/// Priority of a queued candidate.
///
/// Lower cost first; on equal cost rings before edges, then the lower
/// survivor index, then a per-candidate discriminator so that no two
/// queued candidates compare equal.
#[derive(Debug, Clone, Copy)]
pub struct CandidateKey {
    pub cost: f64,
    pub rank: u8,
    pub survivor: u32,
    pub secondary: u32,
}

impl Ord for CandidateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then(self.rank.cmp(&other.rank))
            .then(self.survivor.cmp(&other.survivor))
            .then(self.secondary.cmp(&other.secondary))
    }
}

impl PartialOrd for CandidateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CandidateKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CandidateKey {}

/// A single edge collapse, already rounded to what the history stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgePlan {
    pub removed: PointId,
    pub survivor: PointId,
    pub target: [f32; 3],
    pub cost: f32,
    /// Position of the target along `removed -> survivor`
    pub bias: f32,
}

/// A whole-ring collapse.
#[derive(Debug, Clone, PartialEq)]
pub struct RingPlan {
    pub ring: Ring,
    /// Mean rung cost scaled by the ring preference
    pub priority: f32,
    /// Sum of the rung costs
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Edge(EdgePlan),
    Ring(RingPlan),
}

impl Candidate {
    pub fn key(&self) -> CandidateKey {
        match self {
            Candidate::Edge(plan) => CandidateKey {
                cost: plan.cost as f64,
                rank: RANK_EDGE,
                survivor: plan.survivor.0,
                secondary: plan.removed.0,
            },
            Candidate::Ring(plan) => CandidateKey {
                cost: plan.priority as f64,
                rank: RANK_RING,
                survivor: plan.ring.rungs.first().map(|r| r.0.0).unwrap_or(0),
                secondary: plan.ring.seed.0,
            },
        }
    }

    fn points(&self) -> Vec<PointId> {
        match self {
            Candidate::Edge(plan) => vec![plan.removed, plan.survivor],
            Candidate::Ring(plan) => plan.ring.rungs.iter().flat_map(|&(a, b)| [a, b]).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    candidate: Candidate,
    stamps: Vec<(PointId, u32)>,
}

/// A candidate taken off the queue.
#[derive(Debug, Clone)]
pub struct Popped {
    pub candidate: Candidate,
    pub key: CandidateKey,
    /// A point it depends on changed since it was queued
    pub stale: bool,
}

/// Edge entries and point stamps saved before speculative collapses.
#[derive(Debug, Clone, Default)]
pub struct SchedulerUndo {
    edges: Vec<((PointId, PointId), Option<Slot>)>,
    stamps: Vec<(PointId, u32)>,
    seen_edges: HashSet<(PointId, PointId)>,
    seen_points: HashSet<PointId>,
}

/// Priority queue of edge and ring candidates.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    /// Max-queue over reversed keys, so the cheapest slot pops first
    queue: PriorityQueue<usize, Reverse<CandidateKey>>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    edges: HashMap<(PointId, PointId), usize>,
    rings: HashMap<HalfEdgeId, usize>,
    stamps: Vec<u32>,
    retired: HashSet<(PointId, PointId)>,
}

impl Scheduler {
    pub fn new(point_capacity: usize) -> Self {
        Self {
            stamps: vec![0; point_capacity],
            ..Self::default()
        }
    }

    /// Queue a batch of candidates at once.
    pub fn load(&mut self, candidates: Vec<Candidate>) {
        let mut entries = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(handle) = self.register(candidate) {
                if let Some(slot) = &self.slots[handle] {
                    entries.push((handle, Reverse(slot.candidate.key())));
                }
            }
        }
        self.queue.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }

    /// Queue an edge candidate or re-key the one already queued for the
    /// same point pair.
    pub fn upsert_edge(&mut self, plan: EdgePlan) {
        let key = edge_key(plan.removed, plan.survivor);
        if self.retired.contains(&key) {
            return;
        }
        if let Some(&handle) = self.edges.get(&key) {
            let candidate = Candidate::Edge(plan);
            let key = candidate.key();
            let stamps = self.snapshot(&candidate);
            self.slots[handle] = Some(Slot { candidate, stamps });
            // Re-keys the queued handle in place
            self.queue.push(handle, Reverse(key));
            return;
        }
        self.push(Candidate::Edge(plan));
    }

    pub fn remove_edge(&mut self, a: PointId, b: PointId) {
        if let Some(handle) = self.edges.remove(&edge_key(a, b)) {
            self.release(handle);
        }
    }

    /// Queue any candidate. Rings with an already queued seed are ignored.
    pub fn push(&mut self, candidate: Candidate) {
        if let Some(handle) = self.register(candidate) {
            if let Some(slot) = &self.slots[handle] {
                let key = slot.candidate.key();
                self.queue.push(handle, Reverse(key));
            }
        }
    }

    pub fn clear_rings(&mut self) {
        let handles: Vec<usize> = self.rings.drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.release(handle);
        }
    }

    /// Take the cheapest candidate off the queue.
    pub fn pop(&mut self) -> Option<Popped> {
        let (handle, Reverse(key)) = self.queue.pop()?;
        let slot = self.slots[handle].take()?;
        self.free.push(handle);
        match &slot.candidate {
            Candidate::Edge(plan) => {
                self.edges.remove(&edge_key(plan.removed, plan.survivor));
            }
            Candidate::Ring(plan) => {
                self.rings.remove(&plan.ring.seed);
            }
        }
        let stale = slot
            .stamps
            .iter()
            .any(|&(p, s)| self.stamps.get(p.index()).copied().unwrap_or(0) != s);
        Some(Popped {
            candidate: slot.candidate,
            key,
            stale,
        })
    }

    /// Mark a point as changed, making candidates that read it stale.
    pub fn bump(&mut self, point: PointId) {
        if let Some(stamp) = self.stamps.get_mut(point.index()) {
            *stamp = stamp.wrapping_add(1);
        }
    }

    /// Never queue the edge between `a` and `b` again.
    pub fn retire(&mut self, a: PointId, b: PointId) {
        self.remove_edge(a, b);
        self.retired.insert(edge_key(a, b));
    }

    /// Save the queued entry (or its absence) of every pair and the stamp
    /// of every point, each the first time `undo` sees it.
    pub fn capture(&self, undo: &mut SchedulerUndo, pairs: &[(PointId, PointId)], points: &[PointId]) {
        for &(a, b) in pairs {
            let key = edge_key(a, b);
            if undo.seen_edges.insert(key) {
                let slot = self.edges.get(&key).and_then(|&h| self.slots[h].clone());
                undo.edges.push((key, slot));
            }
        }
        for &point in points {
            if undo.seen_points.insert(point) {
                if let Some(&stamp) = self.stamps.get(point.index()) {
                    undo.stamps.push((point, stamp));
                }
            }
        }
    }

    /// Put the saved entries and stamps back. Handles may differ from the
    /// originals; keys and stamps do not.
    pub fn restore(&mut self, undo: SchedulerUndo) {
        for (point, stamp) in undo.stamps {
            self.stamps[point.index()] = stamp;
        }
        for (key, slot) in undo.edges {
            if let Some(handle) = self.edges.remove(&key) {
                self.release(handle);
            }
            if let Some(slot) = slot {
                let priority = Reverse(slot.candidate.key());
                let handle = self.place(slot);
                self.edges.insert(key, handle);
                self.queue.push(handle, priority);
            }
        }
    }

    fn register(&mut self, candidate: Candidate) -> Option<usize> {
        match &candidate {
            Candidate::Edge(plan) => {
                let key = edge_key(plan.removed, plan.survivor);
                if self.retired.contains(&key) {
                    return None;
                }
                if let Some(handle) = self.edges.remove(&key) {
                    self.release(handle);
                }
                let handle = self.allocate(candidate);
                self.edges.insert(key, handle);
                Some(handle)
            }
            Candidate::Ring(plan) => {
                if self.rings.contains_key(&plan.ring.seed) {
                    return None;
                }
                let seed = plan.ring.seed;
                let handle = self.allocate(candidate);
                self.rings.insert(seed, handle);
                Some(handle)
            }
        }
    }

    fn allocate(&mut self, candidate: Candidate) -> usize {
        let stamps = self.snapshot(&candidate);
        self.place(Slot { candidate, stamps })
    }

    fn place(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(handle) => {
                self.slots[handle] = Some(slot);
                handle
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, handle: usize) {
        self.queue.remove(&handle);
        if self.slots.get_mut(handle).and_then(Option::take).is_some() {
            self.free.push(handle);
        }
    }

    fn snapshot(&self, candidate: &Candidate) -> Vec<(PointId, u32)> {
        candidate
            .points()
            .into_iter()
            .map(|p| (p, self.stamps.get(p.index()).copied().unwrap_or(0)))
            .collect()
    }
}
