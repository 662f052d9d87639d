//! The collapse loop.
//!
//! A [`Decimator`] owns the mesh, its corner attributes, the wedge model,
//! one position quadric per point and the candidate queue. Each call to
//! [`Decimator::reduce`] pops candidates until a target or error bound is
//! met, appending every accepted operation to the history log. Calls can
//! be repeated with smaller targets; the queue and the log carry over.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;
use nalgebra::Matrix4;
use polyreduce_config::{DecimateConfig, Placement, ReduceTargets};
use polyreduce_mesh::{CheckMode, ContractError, HalfEdgeId, MeshUndo, PointId, PolyMesh};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::attributes::{AttributeSet, AttributeUndo, CornerAttributes};
use crate::collapse::{SurvivorPosition, contract_with_attributes, locate_edge, round, would_flip};
use crate::constraints::{Constraints, Hardening, position_quadrics};
use crate::dissolve::{coplanar_pairs, dissolvable};
use crate::error::DecimateError;
use crate::history::{HistoryEvent, HistoryLog};
use crate::quadric::{Quadric, minimize, to_dvec3, to_vector};
use crate::real::Real;
use crate::rings::{Ring, classify_rings, find_knots, is_collapsible, is_knot, ring_at};
use crate::scheduler::{Candidate, EdgePlan, RingPlan, Scheduler, SchedulerUndo};
use crate::wedge::{WedgeModel, WedgePairing, WedgeUndo, pair_wedges, point_wedges};

/// Costs below this fraction of the squared-squared bounding diagonal
/// count as zero.
const COST_FLOOR: f64 = 1e-12;

/// Why a reduction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A polygon or point target was reached
    TargetReached,
    /// The next collapse would cost more than `max_error`
    ErrorBound,
    /// No admissible candidate is left
    Exhausted,
    /// The interrupt flag was raised
    Interrupted,
    /// A dissolve pass already ran; the log takes no more collapses
    Sealed,
}

/// Summary of a reduction. Counts and errors accumulate over every call
/// made on the same decimator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReduceOutcome {
    pub final_polygons: usize,
    pub final_points: usize,
    pub collapses: usize,
    pub dissolves: usize,
    /// Sum of the costs of all accepted collapses
    pub total_error: f64,
    /// Largest accepted collapse cost
    pub max_cost: f64,
    pub stop_reason: StopReason,
    pub warnings: Vec<String>,
}

/// Termination test shared by the optimizer and replay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Goal {
    polygons: Option<usize>,
    points: Option<usize>,
    min_error: f64,
    max_error: f64,
}

impl Goal {
    pub fn new(targets: &ReduceTargets, initial_polygons: usize, initial_points: usize) -> Self {
        Self {
            polygons: targets.target_polygons.map(|t| t.resolve(initial_polygons)),
            points: targets.target_points.map(|t| t.resolve(initial_points)),
            min_error: targets.min_error,
            max_error: targets.max_error_bound(),
        }
    }

    pub fn has_target(&self) -> bool {
        self.polygons.is_some() || self.points.is_some()
    }

    pub fn polygons_reached(&self, polygons: usize) -> bool {
        self.polygons.is_some_and(|t| polygons <= t)
    }

    pub fn reached(&self, polygons: usize, points: usize) -> bool {
        self.polygons_reached(polygons) || self.points.is_some_and(|t| points <= t)
    }

    /// Whether an operation costing `cost` must not run on a mesh with the
    /// given counts.
    pub fn stop(&self, cost: f64, polygons: usize, points: usize) -> Option<StopReason> {
        if self.reached(polygons, points) && cost >= self.min_error {
            return Some(StopReason::TargetReached);
        }
        if cost > self.max_error {
            return Some(StopReason::ErrorBound);
        }
        None
    }

    /// Describe the targets still missed, if any.
    fn shortfall(&self, polygons: usize, points: usize) -> Option<String> {
        if !self.has_target() || self.reached(polygons, points) {
            return None;
        }
        let mut missed = Vec::new();
        if let Some(t) = self.polygons {
            missed.push(format!("target polygon count {} ({} remain)", t, polygons));
        }
        if let Some(t) = self.points {
            missed.push(format!("target point count {} ({} remain)", t, points));
        }
        Some(format!("could not reach {}", missed.join(" or ")))
    }
}

/// Why a candidate was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Topology(ContractError),
    NormalFlip,
    MissingEdge,
    /// A rung became uncollapsible between queueing and execution
    Inadmissible,
}

impl Refusal {
    fn is_permanent(self) -> bool {
        matches!(self, Refusal::Topology(e) if e.is_permanent())
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Topology(e) => write!(f, "{}", e),
            Refusal::NormalFlip => write!(f, "a polygon normal would flip"),
            Refusal::MissingEdge => write!(f, "the edge no longer exists"),
            Refusal::Inadmissible => write!(f, "a ring rung is no longer collapsible"),
        }
    }
}

enum Step {
    Applied,
    Requeued,
    Refused(Refusal),
    Stopped(StopReason),
}

/// Everything a collapse mutates.
#[derive(Debug, Clone)]
struct State<T: Real> {
    mesh: PolyMesh,
    attrs: CornerAttributes,
    wedges: WedgeModel<T>,
    quadrics: Vec<Quadric<T>>,
    point_error: Vec<f64>,
    scheduler: Scheduler,
    knots: Vec<bool>,
    history: HistoryLog,
    collapses: usize,
    dissolves: usize,
    total_error: f64,
    max_cost: f64,
}

/// Pre-images of what a ring has changed so far, captured around each
/// rung before it collapses.
struct RingUndo<T: Real> {
    mesh: MeshUndo,
    attrs: AttributeUndo,
    wedges: WedgeUndo<T>,
    scheduler: SchedulerUndo,
    points: Vec<(PointId, Quadric<T>, f64, Option<bool>)>,
    seen_points: HashSet<PointId>,
    history: usize,
    collapses: usize,
    total_error: f64,
    max_cost: f64,
}

impl<T: Real> RingUndo<T> {
    fn begin(st: &mut State<T>) -> Self {
        Self {
            mesh: MeshUndo::default(),
            attrs: AttributeUndo::default(),
            wedges: st.wedges.begin_undo(),
            scheduler: SchedulerUndo::default(),
            points: Vec::new(),
            seen_points: HashSet::new(),
            history: st.history.len(),
            collapses: st.collapses,
            total_error: st.total_error,
            max_cost: st.max_cost,
        }
    }

    /// Save everything collapsing the edge between `a` and `b` can touch.
    fn capture(&mut self, st: &State<T>, a: PointId, b: PointId) {
        let region = st.mesh.contraction_region(a, b);
        st.mesh.capture(&region, &mut self.mesh);
        st.attrs.capture(&mut self.attrs, &region.half_edges, &region.points);
        st.wedges.capture(&mut self.wedges, &region.half_edges);

        let pairs: Vec<(PointId, PointId)> = [a, b]
            .into_iter()
            .flat_map(|p| region.points.iter().map(move |&x| (p, x)))
            .filter(|(p, x)| p != x)
            .collect();
        st.scheduler.capture(&mut self.scheduler, &pairs, &region.points);

        for &p in &region.points {
            if self.seen_points.insert(p) {
                self.points.push((
                    p,
                    st.quadrics[p.index()],
                    st.point_error[p.index()],
                    st.knots.get(p.index()).copied(),
                ));
            }
        }
    }

    fn restore(self, st: &mut State<T>) {
        st.mesh.restore(self.mesh);
        st.attrs.restore(self.attrs);
        st.wedges.restore(self.wedges);
        st.scheduler.restore(self.scheduler);
        for (p, quadric, error, knot) in self.points {
            st.quadrics[p.index()] = quadric;
            st.point_error[p.index()] = error;
            if let Some(knot) = knot {
                st.knots[p.index()] = knot;
            }
        }
        st.history.truncate(self.history);
        st.collapses = self.collapses;
        st.total_error = self.total_error;
        st.max_cost = self.max_cost;
    }

    fn commit(self, st: &mut State<T>) {
        st.wedges.end_undo();
    }
}

/// Quadric-driven mesh decimator, accumulating in `T`.
#[derive(Debug, Clone)]
pub struct Decimator<T: Real = f64> {
    state: State<T>,
    constraints: Constraints,
    config: DecimateConfig,
    cost_floor: f64,
    initial_polygons: usize,
    initial_points: usize,
}

fn form_cost<T: Real>(form: &Matrix4<T>, p: DVec3) -> f64 {
    Quadric { m: *form }.evaluate(&to_vector(p)).into_f64()
}

fn bounding_diagonal(mesh: &PolyMesh) -> f64 {
    let mut lo = DVec3::splat(f64::INFINITY);
    let mut hi = DVec3::splat(f64::NEG_INFINITY);
    for p in mesh.point_ids() {
        let position = mesh.position(p);
        lo = lo.min(position);
        hi = hi.max(position);
    }
    if lo.x > hi.x { 0.0 } else { (hi - lo).length() }
}

/// Corner sets that share one wedge after the collapse: every pair group,
/// then every wedge left unpaired.
fn merged_corner_sets(pairing: &WedgePairing) -> Vec<Vec<HalfEdgeId>> {
    let mut sets = Vec::new();
    for group in &pairing.groups {
        let corners = group
            .removed
            .iter()
            .flat_map(|&w| pairing.removed[w].iter().copied())
            .chain(
                group
                    .survivor
                    .iter()
                    .flat_map(|&w| pairing.survivor[w].iter().copied()),
            )
            .collect();
        sets.push(corners);
    }
    for (w, corners) in pairing.removed.iter().enumerate() {
        if !pairing.is_paired_removed(w) {
            sets.push(corners.clone());
        }
    }
    for (w, corners) in pairing.survivor.iter().enumerate() {
        if !pairing.is_paired_survivor(w) {
            sets.push(corners.clone());
        }
    }
    sets
}

fn note(refusals: &mut Vec<(Refusal, usize)>, reason: Refusal) {
    match refusals.iter_mut().find(|(r, _)| *r == reason) {
        Some((_, count)) => *count += 1,
        None => refusals.push((reason, 1)),
    }
}

impl<T: Real> Decimator<T> {
    /// Validate the inputs and queue every admissible candidate.
    ///
    /// Fails before doing any work when the configuration, the mesh or an
    /// attribute channel is unusable.
    pub fn new(
        mut mesh: PolyMesh,
        attributes: &AttributeSet,
        hardening: &Hardening,
        config: DecimateConfig,
    ) -> Result<Self, DecimateError> {
        config.validate()?;
        if mesh.num_polygons() == 0 {
            return Err(DecimateError::EmptyMesh);
        }
        if let Some(p) = mesh.point_ids().find(|&p| !mesh.position(p).is_finite()) {
            return Err(DecimateError::NonFinitePosition(p.0));
        }
        mesh.validate()?;
        mesh.ensure_incidence();
        mesh.check_manifold()?;

        let mut attrs = CornerAttributes::resolve(&mesh, attributes)?;
        let mut wedges = WedgeModel::<T>::build(&mesh, &attrs);
        let mut history = HistoryLog::new();
        if config.attribute_tolerance > 0.0 {
            let mut merges = Vec::new();
            for he in mesh.edge_ids() {
                wedges.merge_across_edge(&mesh, &mut attrs, he, config.attribute_tolerance, &mut merges);
            }
            for event in merges {
                history.push(event);
            }
        }

        let constraints = Constraints::resolve(&mesh, &attrs, hardening, &config)?;
        let quadrics = position_quadrics::<T>(&mesh, &attrs, &constraints, &config);
        let cost_floor = COST_FLOOR * bounding_diagonal(&mesh).powi(4);
        let knots = if config.rings.enabled {
            find_knots(&mesh)
        } else {
            Vec::new()
        };

        let capacity = mesh.point_capacity();
        let initial_polygons = mesh.num_polygons();
        let initial_points = mesh.num_points();
        let mut decimator = Self {
            state: State {
                mesh,
                attrs,
                wedges,
                quadrics,
                point_error: vec![0.0; capacity],
                scheduler: Scheduler::new(capacity),
                knots,
                history,
                collapses: 0,
                dissolves: 0,
                total_error: 0.0,
                max_cost: 0.0,
            },
            constraints,
            config,
            cost_floor,
            initial_polygons,
            initial_points,
        };
        decimator.seed_queue();
        Ok(decimator)
    }

    fn seed_queue(&mut self) {
        let mesh = &self.state.mesh;
        let mut candidates: Vec<Candidate> = mesh
            .edge_ids()
            .filter_map(|he| self.evaluate_edge(mesh.source_point(he), mesh.dest_point(he)))
            .map(Candidate::Edge)
            .collect();
        if self.config.rings.enabled {
            candidates.extend(self.ring_candidates());
        }
        self.state.scheduler.load(candidates);
        debug!(
            "Decimator::new: {} points, {} polygons, {} edge candidates, {} ring candidates",
            self.initial_points,
            self.initial_polygons,
            self.state.scheduler.edge_count(),
            self.state.scheduler.ring_count()
        );
    }

    fn ring_candidates(&self) -> Vec<Candidate> {
        classify_rings(&self.state.mesh)
            .into_iter()
            .filter_map(|ring| self.plan_ring(ring))
            .map(Candidate::Ring)
            .collect()
    }

    pub fn reduce(&mut self, targets: &ReduceTargets) -> Result<ReduceOutcome, DecimateError> {
        self.reduce_with_interrupt(targets, &AtomicBool::new(false))
    }

    /// Reduce until `targets` are met, the queue runs dry or `interrupt`
    /// is raised. The flag is polled between candidates; the mesh and log
    /// are consistent whenever this returns.
    pub fn reduce_with_interrupt(
        &mut self,
        targets: &ReduceTargets,
        interrupt: &AtomicBool,
    ) -> Result<ReduceOutcome, DecimateError> {
        targets.validate()?;
        let goal = Goal::new(targets, self.initial_polygons, self.initial_points);
        let mut warnings = Vec::new();

        if self.state.history.is_sealed() {
            let message = "history is sealed by a dissolve pass; no further collapses are possible".to_string();
            warn!("Decimator::reduce: {}", message);
            warnings.push(message);
            return Ok(self.outcome(StopReason::Sealed, warnings));
        }

        let mut refusals = Vec::new();
        let stop = self.run(&goal, interrupt, &mut refusals);
        for (reason, count) in &refusals {
            warnings.push(format!("skipped {} collapse(s): {}", count, reason));
        }

        let (polygons, points) = (self.state.mesh.num_polygons(), self.state.mesh.num_points());
        if let Some(missed) = goal.shortfall(polygons, points) {
            let message = match stop {
                StopReason::Exhausted => Some(format!("{}: no admissible collapse is left", missed)),
                StopReason::ErrorBound => Some(format!(
                    "{}: the next collapse costs more than max_error {}",
                    missed, goal.max_error
                )),
                _ => None,
            };
            if let Some(message) = message {
                warn!("Decimator::reduce: {}", message);
                warnings.push(message);
            }
        }

        if self.config.dissolve_coplanar && stop != StopReason::Interrupted {
            self.dissolve_coplanar(&goal);
        }

        debug!(
            "Decimator::reduce: {:?} at {} polygons, {} points after {} collapses",
            stop,
            self.state.mesh.num_polygons(),
            self.state.mesh.num_points(),
            self.state.collapses
        );
        Ok(self.outcome(stop, warnings))
    }

    fn outcome(&self, stop_reason: StopReason, warnings: Vec<String>) -> ReduceOutcome {
        ReduceOutcome {
            final_polygons: self.state.mesh.num_polygons(),
            final_points: self.state.mesh.num_points(),
            collapses: self.state.collapses,
            dissolves: self.state.dissolves,
            total_error: self.state.total_error,
            max_cost: self.state.max_cost,
            stop_reason,
            warnings,
        }
    }

    fn run(&mut self, goal: &Goal, interrupt: &AtomicBool, refusals: &mut Vec<(Refusal, usize)>) -> StopReason {
        loop {
            if interrupt.load(Ordering::Relaxed) {
                return StopReason::Interrupted;
            }
            let Some(popped) = self.state.scheduler.pop() else {
                let mesh = &self.state.mesh;
                if goal.reached(mesh.num_polygons(), mesh.num_points()) {
                    return StopReason::TargetReached;
                }
                return StopReason::Exhausted;
            };
            if popped.stale {
                self.requeue(popped.candidate);
                continue;
            }
            let step = match popped.candidate {
                Candidate::Edge(plan) => self.try_edge(plan, goal),
                Candidate::Ring(plan) => self.try_ring(plan, goal),
            };
            match step {
                Step::Applied | Step::Requeued => {}
                Step::Refused(reason) => note(refusals, reason),
                Step::Stopped(reason) => return reason,
            }
        }
    }

    /// Recompute a stale candidate and queue it again if still admissible.
    fn requeue(&mut self, candidate: Candidate) {
        match candidate {
            Candidate::Edge(plan) => {
                if let Some(fresh) = self.evaluate_edge(plan.removed, plan.survivor) {
                    self.state.scheduler.upsert_edge(fresh);
                }
            }
            Candidate::Ring(plan) => {
                let fresh = ring_at(&self.state.mesh, plan.ring.seed).and_then(|ring| self.plan_ring(ring));
                if let Some(fresh) = fresh {
                    self.state.scheduler.push(Candidate::Ring(fresh));
                }
            }
        }
    }

    // =========================================================================
    // Candidate evaluation
    // =========================================================================

    /// Cost and placement of collapsing the edge between `a` and `b`, or
    /// `None` when the edge may not collapse at all.
    fn evaluate_edge(&self, a: PointId, b: PointId) -> Option<EdgePlan> {
        let st = &self.state;
        let mesh = &st.mesh;
        if a == b || !mesh.is_point_alive(a) || !mesh.is_point_alive(b) {
            return None;
        }
        mesh.find_edge(a, b)?;
        let (hard_a, hard_b) = (self.constraints.is_hardened(a), self.constraints.is_hardened(b));
        if hard_a && hard_b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        let mut form = st.quadrics[a.index()].m + st.quadrics[b.index()].m;
        let mut penalty = 0.0;
        for (channel, state) in st.attrs.channels().iter().enumerate() {
            let pairing = pair_wedges(mesh, &st.attrs, channel, hi, lo);
            let conflicts = pairing.conflicts().count();
            if conflicts > 0 {
                if st.attrs.point_on_protected_seam(mesh, channel, lo)
                    || st.attrs.point_on_protected_seam(mesh, channel, hi)
                {
                    return None;
                }
                if state.active {
                    penalty += conflicts as f64 * self.config.weights.wedge_conflict_penalty * state.weight;
                }
            }
            if state.active && state.weight > 0.0 {
                form += self.attribute_form(channel, &pairing) * T::lit(state.weight);
            }
        }

        let (removed, survivor, placed) = if hard_a || hard_b {
            let (r, s) = if hard_a { (b, a) } else { (a, b) };
            (r, s, mesh.position(s))
        } else {
            let (pl, ph) = (mesh.position(lo), mesh.position(hi));
            match self.config.placement {
                Placement::Optimal => {
                    let fallback = to_vector::<T>((pl + ph) * 0.5);
                    let x = minimize(&form, &fallback, T::lit(self.config.eigenvalue_ratio));
                    (hi, lo, to_dvec3(&x))
                }
                Placement::Endpoint => {
                    if form_cost(&form, ph) < form_cost(&form, pl) {
                        (lo, hi, ph)
                    } else {
                        (hi, lo, pl)
                    }
                }
            }
        };

        let target = round(placed);
        if target.iter().any(|c| !c.is_finite()) {
            return None;
        }
        // Cost is judged at the position the collapse will really produce
        let at = SurvivorPosition::Recorded(target).resolve(mesh.position(survivor));
        let error = form_cost(&form, at).max(0.0);
        if !error.is_finite() {
            return None;
        }
        let error = if error <= self.cost_floor { 0.0 } else { error };
        let cost = (error + penalty) as f32;
        if !cost.is_finite() {
            return None;
        }

        let (pr, ps) = (mesh.position(removed), mesh.position(survivor));
        let span = ps - pr;
        let len2 = span.length_squared();
        let bias = if len2 > 0.0 {
            ((at - pr).dot(span) / len2).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Some(EdgePlan {
            removed,
            survivor,
            target,
            cost,
            bias: bias as f32,
        })
    }

    /// Reduced attribute quadric of the wedges a collapse would produce.
    fn attribute_form(&self, channel: usize, pairing: &WedgePairing) -> Matrix4<T> {
        let mut form = Matrix4::zeros();
        for corners in merged_corner_sets(pairing) {
            for q in self.state.wedges.sum_quadrics(channel, corners) {
                form += q.reduced();
            }
        }
        form
    }

    fn plan_ring(&self, ring: Ring) -> Option<RingPlan> {
        if !is_collapsible(&ring, &self.state.knots) {
            return None;
        }
        let mut total = 0.0;
        for &(a, b) in &ring.rungs {
            total += self.evaluate_edge(a, b)?.cost as f64;
        }
        let mean = total / ring.rungs.len() as f64;
        Some(RingPlan {
            priority: (mean * self.config.rings.ring_priority_scale) as f32,
            total_cost: total,
            ring,
        })
    }

    /// Checks that depend on the neighbourhood at execution time.
    fn check_edge(&self, plan: &EdgePlan) -> Result<(), Refusal> {
        let mesh = &self.state.mesh;
        let (he, onto) = locate_edge(mesh, plan.removed, plan.survivor).ok_or(Refusal::MissingEdge)?;
        mesh.can_contract(he, onto).map_err(Refusal::Topology)?;
        let placed = SurvivorPosition::Recorded(plan.target).resolve(mesh.position(plan.survivor));
        if would_flip(
            mesh,
            plan.removed,
            plan.survivor,
            placed,
            self.config.max_normal_deviation_degrees,
        ) {
            return Err(Refusal::NormalFlip);
        }
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn try_edge(&mut self, plan: EdgePlan, goal: &Goal) -> Step {
        if let Err(reason) = self.check_edge(&plan) {
            if reason.is_permanent() {
                self.state.scheduler.retire(plan.removed, plan.survivor);
            }
            trace!(
                "Decimator: refused {:?} -> {:?}: {}",
                plan.removed, plan.survivor, reason
            );
            return Step::Refused(reason);
        }
        let mesh = &self.state.mesh;
        if let Some(reason) = goal.stop(plan.cost as f64, mesh.num_polygons(), mesh.num_points()) {
            self.state.scheduler.push(Candidate::Edge(plan));
            return Step::Stopped(reason);
        }
        match self.apply_edge(&plan) {
            Ok(()) => Step::Applied,
            Err(e) => Step::Refused(Refusal::Topology(e)),
        }
    }

    /// Run a whole ring inside one history batch, or nothing of it.
    fn try_ring(&mut self, plan: RingPlan, goal: &Goal) -> Step {
        let current = ring_at(&self.state.mesh, plan.ring.seed);
        if current.as_ref() != Some(&plan.ring) {
            if let Some(fresh) = current.and_then(|ring| self.plan_ring(ring)) {
                self.state.scheduler.push(Candidate::Ring(fresh));
            }
            return Step::Requeued;
        }

        let (polygons, points) = (self.state.mesh.num_polygons(), self.state.mesh.num_points());
        let stop = goal.stop(plan.priority as f64, polygons, points);
        let mut undo = RingUndo::begin(&mut self.state);
        self.state.history.push(HistoryEvent::BatchStart { cost: plan.priority });

        for &(a, b) in &plan.ring.rungs {
            let result = match self.evaluate_edge(a, b) {
                None => Err(Refusal::Inadmissible),
                Some(edge) => match self.check_edge(&edge) {
                    Ok(()) => {
                        undo.capture(&self.state, edge.removed, edge.survivor);
                        self.apply_edge(&edge).map_err(Refusal::Topology)
                    }
                    Err(reason) => Err(reason),
                },
            };
            if let Err(reason) = result {
                trace!(
                    "Decimator: ring {:?} refused at rung {:?} -> {:?}: {}",
                    plan.ring.seed, a, b, reason
                );
                undo.restore(&mut self.state);
                return Step::Refused(reason);
            }
        }
        self.state.history.push(HistoryEvent::BatchEnd);

        // The whole ring runs before the stop test so that replay, which
        // never checks inside a batch, agrees on which rings happened
        if let Some(reason) = stop {
            undo.restore(&mut self.state);
            self.state.scheduler.push(Candidate::Ring(plan));
            return Step::Stopped(reason);
        }
        undo.commit(&mut self.state);

        trace!(
            "Decimator: collapsed ring {:?} ({} rungs, cost {})",
            plan.ring.seed,
            plan.ring.rungs.len(),
            plan.total_cost
        );
        self.state.scheduler.clear_rings();
        self.state.knots = find_knots(&self.state.mesh);
        let rings = self.ring_candidates();
        for candidate in rings {
            self.state.scheduler.push(candidate);
        }
        Step::Applied
    }

    /// Points across the collapsing edge in triangles it deletes.
    fn doomed_opposites(&self, removed: PointId, survivor: PointId) -> Vec<PointId> {
        let mesh = &self.state.mesh;
        let mut opposite: Vec<PointId> = [
            mesh.find_half_edge(removed, survivor),
            mesh.find_half_edge(survivor, removed),
        ]
        .into_iter()
        .flatten()
        .filter(|&h| mesh.polygon_of(h).is_some_and(|p| mesh.is_triangle(p)))
        .map(|h| mesh.source_point(mesh.prev(h)))
        .collect();
        opposite.sort_unstable();
        opposite.dedup();
        opposite
    }

    /// Contract a validated edge and bring quadrics, wedges, errors, the
    /// queue and the log up to date.
    fn apply_edge(&mut self, plan: &EdgePlan) -> Result<(), ContractError> {
        let (removed, survivor) = (plan.removed, plan.survivor);
        let opposite = self.doomed_opposites(removed, survivor);
        let former_neighbors = self.state.mesh.neighbors(removed);

        // Corner sets whose wedges must keep their quadric mass even if
        // every corner of an old wedge dies
        let channels = self.state.attrs.channel_count();
        let mut clusters: Vec<Vec<(PointId, Vec<HalfEdgeId>)>> = Vec::with_capacity(channels);
        for channel in 0..channels {
            let st = &self.state;
            let pairing = pair_wedges(&st.mesh, &st.attrs, channel, removed, survivor);
            let mut sets: Vec<(PointId, Vec<HalfEdgeId>)> = merged_corner_sets(&pairing)
                .into_iter()
                .map(|corners| (survivor, corners))
                .collect();
            for &x in &opposite {
                for corners in point_wedges(&st.mesh, &st.attrs, channel, x) {
                    sets.push((x, corners));
                }
            }
            clusters.push(sets);
        }

        let st = &mut self.state;
        contract_with_attributes(
            &mut st.mesh,
            &mut st.attrs,
            removed,
            survivor,
            SurvivorPosition::Recorded(plan.target),
            plan.bias as f64,
            CheckMode::Skip,
        )?;

        let merged = st.quadrics[removed.index()];
        st.quadrics[survivor.index()] += merged;
        st.quadrics[removed.index()] = Quadric::zero();
        st.point_error[survivor.index()] += st.point_error[removed.index()] + plan.cost as f64;
        st.point_error[removed.index()] = 0.0;

        for (channel, sets) in clusters.into_iter().enumerate() {
            let mut carries: Vec<(PointId, Vec<(u32, HalfEdgeId)>)> = Vec::new();
            for (point, corners) in sets {
                let anchor = corners
                    .iter()
                    .copied()
                    .find(|&c| st.mesh.is_half_edge_alive(c))
                    .or_else(|| st.mesh.outgoing(point).first().copied());
                let Some(anchor) = anchor else {
                    continue;
                };
                let mut olds: Vec<u32> = corners
                    .iter()
                    .filter_map(|&c| st.wedges.wedge_of(channel, c))
                    .collect();
                olds.sort_unstable();
                olds.dedup();
                let entry = match carries.iter_mut().find(|(p, _)| *p == point) {
                    Some(entry) => entry,
                    None => {
                        carries.push((point, Vec::new()));
                        let last = carries.len() - 1;
                        &mut carries[last]
                    }
                };
                entry.1.extend(olds.into_iter().map(|old| (old, anchor)));
            }
            for point in std::iter::once(survivor).chain(opposite.iter().copied()) {
                let carry = carries
                    .iter()
                    .find(|(p, _)| *p == point)
                    .map(|(_, c)| c.as_slice())
                    .unwrap_or(&[]);
                st.wedges.refresh_point(&st.mesh, &st.attrs, channel, point, carry);
            }
        }

        let cost = plan.cost as f64;
        st.history.push(HistoryEvent::Collapse {
            from: removed,
            to: survivor,
            target: plan.target,
            cost: plan.cost,
            bias: plan.bias,
            resulting_polygons: st.mesh.num_polygons() as u32,
        });
        st.collapses += 1;
        st.total_error += cost;
        st.max_cost = st.max_cost.max(cost);
        trace!(
            "Decimator: collapsed {:?} into {:?} (cost {}, {} polygons left)",
            removed,
            survivor,
            cost,
            st.mesh.num_polygons()
        );

        for x in former_neighbors {
            st.scheduler.remove_edge(removed, x);
        }
        st.scheduler.bump(removed);
        st.scheduler.bump(survivor);
        for &x in &opposite {
            st.scheduler.bump(x);
        }

        if self.config.rings.enabled {
            let st = &mut self.state;
            let mut touched = st.mesh.neighbors(survivor);
            touched.push(survivor);
            for p in touched {
                st.knots[p.index()] = is_knot(&st.mesh, p);
            }
            st.knots[removed.index()] = true;
        }

        let around = self.state.mesh.neighbors(survivor);
        let plans: Vec<(PointId, Option<EdgePlan>)> = around
            .into_iter()
            .map(|x| (x, self.evaluate_edge(survivor, x)))
            .collect();
        for (x, plan) in plans {
            match plan {
                Some(plan) => self.state.scheduler.upsert_edge(plan),
                None => self.state.scheduler.remove_edge(survivor, x),
            }
        }
        Ok(())
    }

    /// Merge flat triangle pairs into quads, flattest first, until the
    /// polygon target is met. Seals the log when anything was merged.
    fn dissolve_coplanar(&mut self, goal: &Goal) {
        let tolerance = self.config.coplanar_tolerance_degrees;
        let min_cos = tolerance.to_radians().cos();
        let pairs = coplanar_pairs(&self.state.mesh, &self.state.attrs, &self.constraints, tolerance);
        let mut count = 0;

        for pair in pairs {
            let st = &mut self.state;
            if goal.polygons_reached(st.mesh.num_polygons()) {
                break;
            }
            let he = pair.edge;
            if !st.mesh.is_half_edge_alive(he)
                || dissolvable(&st.mesh, &st.attrs, &self.constraints, he, min_cos).is_none()
            {
                continue;
            }
            let Some(twin) = st.mesh.twin(he) else {
                continue;
            };
            let (a, b) = (st.mesh.source_point(he), st.mesh.dest_point(he));
            let next = st.mesh.dest_point(st.mesh.next(he));
            // The corners of `a` and `b` that survive the merge
            let (keep_a, keep_b) = (st.mesh.next(twin), st.mesh.next(he));
            let olds: Vec<(Option<u32>, Option<u32>)> = (0..st.attrs.channel_count())
                .map(|c| (st.wedges.wedge_of(c, he), st.wedges.wedge_of(c, twin)))
                .collect();

            if st.mesh.dissolve(he).is_err() {
                continue;
            }
            for (channel, (old_a, old_b)) in olds.into_iter().enumerate() {
                let carry_a: Vec<(u32, HalfEdgeId)> = old_a.map(|w| (w, keep_a)).into_iter().collect();
                let carry_b: Vec<(u32, HalfEdgeId)> = old_b.map(|w| (w, keep_b)).into_iter().collect();
                st.wedges.refresh_point(&st.mesh, &st.attrs, channel, a, &carry_a);
                st.wedges.refresh_point(&st.mesh, &st.attrs, channel, b, &carry_b);
            }
            st.history.push(HistoryEvent::Dissolve {
                from: a,
                to: b,
                next,
                resulting_polygons: st.mesh.num_polygons() as u32,
            });
            st.dissolves += 1;
            count += 1;
        }

        if count > 0 {
            self.state.history.seal();
            debug!("Decimator: dissolved {} coplanar edges, history sealed", count);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mesh(&self) -> &PolyMesh {
        &self.state.mesh
    }

    pub fn attributes(&self) -> &CornerAttributes {
        &self.state.attrs
    }

    pub fn history(&self) -> &HistoryLog {
        &self.state.history
    }

    pub fn config(&self) -> &DecimateConfig {
        &self.config
    }

    /// Number of candidates currently queued.
    pub fn queued(&self) -> usize {
        self.state.scheduler.len()
    }

    /// Accumulated collapse cost per point slot; dead slots read zero.
    pub fn point_errors(&self) -> Vec<f64> {
        let mesh = &self.state.mesh;
        (0..mesh.point_capacity())
            .map(|i| {
                if mesh.is_point_alive(PointId(i as u32)) {
                    self.state.point_error[i]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Mean accumulated error of each polygon's points; dead slots read
    /// zero.
    pub fn polygon_errors(&self) -> Vec<f64> {
        let mesh = &self.state.mesh;
        let mut errors = vec![0.0; mesh.polygon_capacity()];
        for poly in mesh.polygon_ids() {
            let points = mesh.polygon_points(poly);
            let sum: f64 = points.iter().map(|p| self.state.point_error[p.index()]).sum();
            errors[poly.index()] = sum / points.len() as f64;
        }
        errors
    }

    fn check_channel(&self, channel: usize) -> Result<(), DecimateError> {
        let count = self.state.attrs.channel_count();
        if channel >= count {
            return Err(DecimateError::UnknownChannel { channel, count });
        }
        Ok(())
    }

    /// Current values of a channel in the layout it was supplied in.
    pub fn attribute_values(&self, channel: usize) -> Result<Vec<f64>, DecimateError> {
        self.check_channel(channel)?;
        Ok(self.state.attrs.export(&self.state.mesh, channel))
    }

    /// Number of distinct wedges of `channel` around `point`.
    pub fn wedge_count(&self, channel: usize, point: PointId) -> Result<usize, DecimateError> {
        self.check_channel(channel)?;
        if !self.state.mesh.is_point_alive(point) {
            return Err(DecimateError::PointOutOfRange(point.0));
        }
        Ok(self.state.wedges.wedge_count(&self.state.mesh, channel, point))
    }

    pub fn into_parts(self) -> (PolyMesh, CornerAttributes, HistoryLog) {
        (self.state.mesh, self.state.attrs, self.state.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeChannel;
    use crate::fixtures::{self, NORMAL, UV};
    use crate::scheduler::Popped;
    use nalgebra::Vector3;
    use polyreduce_config::RingConfig;

    fn decimator(mesh: PolyMesh, config: DecimateConfig) -> Decimator {
        Decimator::new(mesh, &AttributeSet::new(), &Hardening::default(), config).unwrap()
    }

    fn events_of(history: &HistoryLog) -> Vec<HistoryEvent> {
        history.events().to_vec()
    }

    #[test]
    fn test_hardened_square_is_exhausted() {
        let config = DecimateConfig {
            harden_boundary: true,
            ..DecimateConfig::default()
        };
        let mut d = decimator(fixtures::square(), config);
        assert_eq!(d.queued(), 0);
        let outcome = d.reduce(&ReduceTargets::polygons(1)).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Exhausted);
        assert_eq!(outcome.final_polygons, 2);
        assert_eq!(outcome.collapses, 0);
        assert!(outcome.warnings.iter().any(|w| w.contains("target polygon count 1")));
        assert!(d.history().is_empty());
    }

    #[test]
    fn test_square_collapses_to_one_triangle() {
        let mut d = decimator(fixtures::square(), DecimateConfig::default());
        let outcome = d.reduce(&ReduceTargets::polygons(1)).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.final_polygons, 1);
        assert_eq!(outcome.final_points, 3);
        assert_eq!(d.history().collapse_count(), 1);
        assert!(d.mesh().validate().is_ok());
    }

    #[test]
    fn test_square_dissolves_into_quad() {
        let config = DecimateConfig {
            harden_boundary: true,
            dissolve_coplanar: true,
            ..DecimateConfig::default()
        };
        let mut d = decimator(fixtures::square(), config);
        let outcome = d.reduce(&ReduceTargets::polygons(1)).unwrap();
        assert_eq!(outcome.final_polygons, 1);
        assert_eq!(outcome.dissolves, 1);
        let poly = d.mesh().polygon_ids().next().unwrap();
        assert!(d.mesh().is_quad(poly));
        assert!(d.history().is_sealed());
        assert!(matches!(
            d.history().events().last(),
            Some(HistoryEvent::Dissolve { .. })
        ));

        let again = d.reduce(&ReduceTargets::polygons(1)).unwrap();
        assert_eq!(again.stop_reason, StopReason::Sealed);
        assert_eq!(again.warnings.len(), 1);
    }

    /// Independent evaluation of the plain Garland-Heckbert cost of every
    /// edge of a closed triangle mesh.
    fn brute_force_minimum(mesh: &PolyMesh) -> f64 {
        let mut quadrics = vec![Matrix4::<f64>::zeros(); mesh.point_capacity()];
        for poly in mesh.polygon_ids() {
            let pts: Vec<DVec3> = mesh.polygon_points(poly).iter().map(|&p| mesh.position(p)).collect();
            let cross = (pts[1] - pts[0]).cross(pts[2] - pts[0]);
            let area = 0.5 * cross.length();
            let n = cross.normalize();
            let centroid = (pts[0] + pts[1] + pts[2]) / 3.0;
            let plane = nalgebra::Vector4::new(n.x, n.y, n.z, -n.dot(centroid));
            for p in mesh.polygon_points(poly) {
                quadrics[p.index()] += plane * plane.transpose() * area;
            }
        }
        let mut best = f64::INFINITY;
        for he in mesh.edge_ids() {
            let (a, b) = (mesh.source_point(he), mesh.dest_point(he));
            let q = quadrics[a.index()] + quadrics[b.index()];
            let m3 = q.fixed_view::<3, 3>(0, 0).into_owned();
            let rhs: Vector3<f64> = -q.fixed_view::<3, 1>(0, 3).into_owned();
            let x = m3.try_inverse().unwrap() * rhs;
            let h = nalgebra::Vector4::new(x.x, x.y, x.z, 1.0);
            best = best.min(h.dot(&(q * h)));
        }
        best
    }

    /// Plain greedy reduction of a closed, attribute-free mesh: every live
    /// edge is re-evaluated from the summed plane quadrics at each step and
    /// the cheapest admissible one is contracted. Edges refused once are
    /// only reconsidered after a collapse lands on one of their ends.
    fn greedy_reference(mut mesh: PolyMesh, config: &DecimateConfig, points: usize) -> (f64, usize) {
        let floor = COST_FLOOR * bounding_diagonal(&mesh).powi(4);
        let mut quadrics = vec![Quadric::<f64>::zero(); mesh.point_capacity()];
        for poly in mesh.polygon_ids() {
            let area_normal = mesh.polygon_area_normal(poly);
            let plane = Quadric::from_plane(
                area_normal.normalize_or_zero(),
                mesh.polygon_centroid(poly),
                0.5 * area_normal.length(),
            );
            for p in mesh.polygon_points(poly) {
                quadrics[p.index()] += plane;
            }
        }

        let mut refused: HashSet<(PointId, PointId)> = HashSet::new();
        let mut total = 0.0;
        while mesh.num_points() > points {
            let mut options: Vec<(f32, PointId, PointId, DVec3)> = Vec::new();
            for he in mesh.edge_ids() {
                let (a, b) = (mesh.source_point(he), mesh.dest_point(he));
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                if refused.contains(&(lo, hi)) {
                    continue;
                }
                let form = quadrics[lo.index()].m + quadrics[hi.index()].m;
                let fallback = to_vector::<f64>((mesh.position(lo) + mesh.position(hi)) * 0.5);
                let x = minimize(&form, &fallback, config.eigenvalue_ratio);
                let at = SurvivorPosition::Recorded(round(to_dvec3(&x))).resolve(mesh.position(lo));
                let error = form_cost(&form, at).max(0.0);
                let error = if error <= floor { 0.0 } else { error };
                options.push((error as f32, lo, hi, at));
            }
            options.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

            let mut applied = false;
            for (cost, lo, hi, at) in options {
                let (he, onto) = locate_edge(&mesh, hi, lo).unwrap();
                if mesh.can_contract(he, onto).is_err()
                    || would_flip(&mesh, hi, lo, at, config.max_normal_deviation_degrees)
                {
                    refused.insert((lo, hi));
                    continue;
                }
                mesh.contract(he, onto, CheckMode::Skip).unwrap();
                mesh.set_position(lo, at);
                let merged = quadrics[hi.index()];
                quadrics[lo.index()] += merged;
                refused.retain(|&(a, b)| a != lo && b != lo);
                total += cost as f64;
                applied = true;
                break;
            }
            if !applied {
                break;
            }
        }
        (total, mesh.num_polygons())
    }

    #[test]
    fn test_icosahedron_reduction() {
        let mesh = fixtures::icosahedron();
        let expected_first = brute_force_minimum(&mesh);
        let config = DecimateConfig::default();
        let (expected_total, expected_polygons) = greedy_reference(mesh.clone(), &config, 6);
        let mut d = decimator(mesh, config);
        let outcome = d.reduce(&ReduceTargets::points(6)).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.final_points, 6);
        assert_eq!(outcome.final_polygons, expected_polygons);
        assert!(d.mesh().is_closed());
        assert!(d.mesh().validate().is_ok());
        assert!(d.mesh().check_manifold().is_ok());

        let first = d
            .history()
            .events()
            .iter()
            .find_map(|e| match e {
                HistoryEvent::Collapse { cost, .. } => Some(*cost as f64),
                _ => None,
            })
            .unwrap();
        assert!((first - expected_first).abs() <= 1e-6 * expected_first.max(1.0));
        assert!(expected_total > 0.0);
        assert!((outcome.total_error - expected_total).abs() <= 1e-6 * expected_total.max(1.0));
    }

    #[test]
    fn test_single_precision_icosahedron() {
        let mut d: Decimator<f32> = Decimator::new(
            fixtures::icosahedron(),
            &AttributeSet::new(),
            &Hardening::default(),
            DecimateConfig::default(),
        )
        .unwrap();
        let outcome = d.reduce(&ReduceTargets::points(6)).unwrap();
        assert_eq!(outcome.final_points, 6);
        assert!(d.mesh().is_closed());
        assert!(d.mesh().validate().is_ok());
    }

    #[test]
    fn test_quad_grid_collapses_whole_rings() {
        let mut d = decimator(fixtures::quad_grid(10), DecimateConfig::with_rings());
        let outcome = d.reduce(&ReduceTargets::polygons(50)).unwrap();
        assert_eq!(outcome.final_polygons, 50);
        let mesh = d.mesh();
        let quads = mesh.polygon_ids().filter(|&p| mesh.is_quad(p)).count();
        assert!(quads as f64 >= 0.9 * outcome.final_polygons as f64);

        let batches = d
            .history()
            .events()
            .iter()
            .filter(|e| matches!(e, HistoryEvent::BatchStart { .. }))
            .count();
        assert!(batches >= 1);
        assert!(matches!(
            d.history().events().first(),
            Some(HistoryEvent::BatchStart { .. })
        ));
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_ring_rollback_restores_state() {
        let mesh = fixtures::quad_grid(10);
        let values: Vec<f64> = mesh.positions().iter().map(|p| p.x * p.y).collect();
        let set = AttributeSet::new().with_channel(AttributeChannel::per_point("f", 1, values).passive());
        let build = || {
            Decimator::<f64>::new(mesh.clone(), &set, &Hardening::default(), DecimateConfig::with_rings()).unwrap()
        };
        let mut d = build();
        let Some(Popped {
            candidate: Candidate::Ring(plan),
            ..
        }) = d.state.scheduler.pop()
        else {
            panic!("expected a ring first");
        };
        let mut expected = d.state.clone();

        let mut undo = RingUndo::begin(&mut d.state);
        for &(a, b) in &plan.ring.rungs {
            let edge = d.evaluate_edge(a, b).unwrap();
            undo.capture(&d.state, edge.removed, edge.survivor);
            d.apply_edge(&edge).unwrap();
        }
        assert_eq!(d.state.collapses, plan.ring.rungs.len());
        assert!(d.mesh().num_polygons() < expected.mesh.num_polygons());
        undo.restore(&mut d.state);

        let st = &mut d.state;
        assert_eq!(st.mesh, expected.mesh);
        assert_eq!(st.attrs, expected.attrs);
        assert_eq!(st.wedges, expected.wedges);
        assert_eq!(st.quadrics, expected.quadrics);
        assert_eq!(st.point_error, expected.point_error);
        assert_eq!(st.knots, expected.knots);
        assert_eq!(st.history, expected.history);
        assert_eq!((st.collapses, st.total_error), (0, 0.0));
        let drain = |s: &mut Scheduler| {
            std::iter::from_fn(|| s.pop())
                .map(|p| (p.key, p.stale))
                .collect::<Vec<_>>()
        };
        assert_eq!(drain(&mut st.scheduler.clone()), drain(&mut expected.scheduler));

        // Put back the popped ring; the run must match an untouched decimator
        st.scheduler.push(Candidate::Ring(plan));
        let targets = ReduceTargets::polygons(50);
        d.reduce(&targets).unwrap();
        let mut direct = build();
        direct.reduce(&targets).unwrap();
        assert_eq!(events_of(d.history()), events_of(direct.history()));
        assert_eq!(d.mesh(), direct.mesh());
    }

    #[test]
    fn test_rings_disabled_leaves_triangles() {
        let config = DecimateConfig {
            rings: RingConfig {
                enabled: false,
                ..RingConfig::default()
            },
            ..DecimateConfig::default()
        };
        let mut d = decimator(fixtures::quad_grid(4), config);
        d.reduce(&ReduceTargets::polygons(12)).unwrap();
        assert!(
            d.history()
                .events()
                .iter()
                .all(|e| !matches!(e, HistoryEvent::BatchStart { .. }))
        );
    }

    fn seam_decimator(hardening: Hardening) -> Decimator {
        let mesh = fixtures::seam_strip();
        let attributes = fixtures::seam_strip_attributes(&mesh);
        Decimator::new(mesh, &attributes, &hardening, DecimateConfig::default()).unwrap()
    }

    #[test]
    fn test_seam_survives_collapse_along_it() {
        let mut pins = Hardening::default();
        for p in [0, 1, 2, 3, 5, 6, 7, 8] {
            pins = pins.pin(p);
        }
        let mut d = seam_decimator(pins);
        let outcome = d.reduce(&ReduceTargets::points(8)).unwrap();
        assert_eq!(outcome.final_points, 8);

        // Point 4 slid down the seam onto point 1
        assert!(matches!(
            d.history().events().last(),
            Some(HistoryEvent::Collapse { from: PointId(4), to: PointId(1), .. })
        ));
        assert_eq!(d.wedge_count(NORMAL, PointId(1)).unwrap(), 2);
        assert_eq!(d.wedge_count(UV, PointId(1)).unwrap(), 1);
        assert!(d.wedge_count(7, PointId(1)).is_err());
    }

    #[test]
    fn test_seam_values_never_blend() {
        let mut d = seam_decimator(Hardening::default());
        d.reduce(&ReduceTargets::points(4)).unwrap();
        let left = [-0.5, 0.0, 0.866_025_4];
        let right = [0.5, 0.0, 0.866_025_4];
        let mesh = d.mesh();
        for corner in mesh.half_edge_ids() {
            let value = d.attributes().value(NORMAL, corner);
            assert!(value == left || value == right, "blended normal {:?}", value);
        }
    }

    #[test]
    fn test_boundary_points_stay_put() {
        let mesh = fixtures::wavy_grid(6);
        let boundary: Vec<(PointId, DVec3)> = mesh
            .point_ids()
            .filter(|&p| mesh.is_boundary_point(p))
            .map(|p| (p, mesh.position(p)))
            .collect();
        let config = DecimateConfig {
            harden_boundary: true,
            ..DecimateConfig::default()
        };
        let mut d = decimator(mesh, config);
        d.reduce(&ReduceTargets::polygon_ratio(0.3)).unwrap();
        for (p, position) in boundary {
            assert!(d.mesh().is_point_alive(p));
            assert_eq!(d.mesh().position(p), position);
        }
    }

    #[test]
    fn test_costs_are_valid_and_counts_monotonic() {
        let mut d = decimator(fixtures::wavy_grid(6), DecimateConfig::default());
        let mut last = d.mesh().num_polygons();
        for ratio in [0.9, 0.7, 0.5, 0.3] {
            let outcome = d.reduce(&ReduceTargets::polygon_ratio(ratio)).unwrap();
            let target = (36.0 * ratio).round() as usize;
            assert!(outcome.final_polygons <= last);
            if outcome.stop_reason == StopReason::TargetReached {
                assert!(outcome.final_polygons <= target);
                assert!(outcome.final_polygons + 2 >= target);
            }
            last = outcome.final_polygons;
        }
        for event in d.history().events() {
            if let Some(cost) = event.cost() {
                assert!(cost.is_finite() && cost >= 0.0);
            }
        }
        assert!(d.point_errors().iter().all(|e| *e >= 0.0));
        assert_eq!(d.polygon_errors().len(), d.mesh().polygon_capacity());
    }

    #[test]
    fn test_resumed_run_matches_direct_run() {
        let mut direct = decimator(fixtures::wavy_grid(6), DecimateConfig::default());
        direct.reduce(&ReduceTargets::polygon_ratio(0.5)).unwrap();

        let mut staged = decimator(fixtures::wavy_grid(6), DecimateConfig::default());
        staged.reduce(&ReduceTargets::polygon_ratio(0.8)).unwrap();
        staged.reduce(&ReduceTargets::polygon_ratio(0.5)).unwrap();

        assert_eq!(events_of(direct.history()), events_of(staged.history()));
        assert_eq!(direct.mesh().polygon_lists(), staged.mesh().polygon_lists());
        assert_eq!(direct.mesh().positions(), staged.mesh().positions());
    }

    #[test]
    fn test_error_bound_stops_early() {
        let mut d = decimator(fixtures::wavy_grid(6), DecimateConfig::default());
        let targets = ReduceTargets {
            max_error: Some(0.0),
            ..ReduceTargets::polygons(1)
        };
        let outcome = d.reduce(&targets).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::ErrorBound);
        assert!(outcome.max_cost <= 0.0);
        assert!(outcome.warnings.iter().any(|w| w.contains("max_error")));
    }

    #[test]
    fn test_min_error_runs_free_collapses_past_target() {
        // Every collapse on a flat interior costs nothing
        let mut d = decimator(fixtures::quad_grid(4), DecimateConfig::default());
        let free = d
            .reduce(&ReduceTargets {
                min_error: 1e-9,
                ..ReduceTargets::polygons(15)
            })
            .unwrap();
        let mut plain = decimator(fixtures::quad_grid(4), DecimateConfig::default());
        let bounded = plain.reduce(&ReduceTargets::polygons(15)).unwrap();
        assert!(free.collapses >= bounded.collapses);
    }

    #[test]
    fn test_interrupt_stops_before_any_collapse() {
        let mut d = decimator(fixtures::icosahedron(), DecimateConfig::default());
        let flag = AtomicBool::new(true);
        let outcome = d.reduce_with_interrupt(&ReduceTargets::points(6), &flag).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Interrupted);
        assert_eq!(outcome.final_points, 12);
        assert!(d.history().is_empty());

        // The same decimator carries on once the flag is lowered
        flag.store(false, Ordering::Relaxed);
        let outcome = d.reduce_with_interrupt(&ReduceTargets::points(6), &flag).unwrap();
        assert_eq!(outcome.final_points, 6);
    }

    #[test]
    fn test_endpoint_placement_reuses_positions() {
        let mesh = fixtures::wavy_grid(4);
        let original = mesh.positions();
        let config = DecimateConfig {
            placement: Placement::Endpoint,
            ..DecimateConfig::default()
        };
        let mut d = decimator(mesh, config);
        d.reduce(&ReduceTargets::polygon_ratio(0.5)).unwrap();
        for p in d.mesh().point_ids() {
            assert!(original.contains(&d.mesh().position(p)));
        }
    }

    #[test]
    fn test_precondition_errors() {
        let mesh = fixtures::square();
        let bad = AttributeSet::new().with_channel(AttributeChannel::per_point("t", 1, vec![0.0; 3]));
        assert!(matches!(
            Decimator::<f64>::new(mesh.clone(), &bad, &Hardening::default(), DecimateConfig::default()),
            Err(DecimateError::ChannelLength { expected: 4, found: 3, .. })
        ));

        let config = DecimateConfig {
            eigenvalue_ratio: 2.0,
            ..DecimateConfig::default()
        };
        assert!(matches!(
            Decimator::<f64>::new(mesh.clone(), &AttributeSet::new(), &Hardening::default(), config),
            Err(DecimateError::Config(_))
        ));

        assert!(matches!(
            Decimator::<f64>::new(
                mesh.clone(),
                &AttributeSet::new(),
                &Hardening::default().pin(9),
                DecimateConfig::default()
            ),
            Err(DecimateError::PointOutOfRange(9))
        ));

        let mut lifted = mesh;
        lifted.set_position(PointId(2), DVec3::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(
            Decimator::<f64>::new(lifted, &AttributeSet::new(), &Hardening::default(), DecimateConfig::default()),
            Err(DecimateError::NonFinitePosition(2))
        ));

        let empty = PolyMesh::from_polygons(&[DVec3::ZERO], &[] as &[Vec<u32>]).unwrap();
        assert!(matches!(
            Decimator::<f64>::new(empty, &AttributeSet::new(), &Hardening::default(), DecimateConfig::default()),
            Err(DecimateError::EmptyMesh)
        ));
    }

    #[test]
    fn test_near_equal_values_are_merged_and_logged() {
        let mesh = fixtures::square();
        let mut values = vec![1.0; 6];
        // The corner of point 0 in the second triangle is a hair off
        values[3] = 1.0 + 1e-9;
        let set = AttributeSet::new().with_channel(AttributeChannel::per_corner("s", 1, values));
        let config = DecimateConfig {
            attribute_tolerance: 1e-6,
            ..DecimateConfig::default()
        };
        let d: Decimator = Decimator::new(mesh, &set, &Hardening::default(), config).unwrap();
        let merges = d
            .history()
            .events()
            .iter()
            .filter(|e| matches!(e, HistoryEvent::VertexMerge { .. }))
            .count();
        assert_eq!(merges, 1);
        assert_eq!(d.wedge_count(0, PointId(0)).unwrap(), 1);
        assert!(d.attribute_values(0).unwrap().iter().all(|&v| v == 1.0));
    }
}
