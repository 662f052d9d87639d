//! Re-applying a recorded history without the optimizer.
//!
//! A [`Replayer`] walks a [`HistoryLog`] from the start against a fresh
//! copy of the input and stops under the same rule the decimator uses, so
//! any level of detail the log passed through can be rebuilt in time
//! proportional to the events replayed. No quadric is ever computed.

use glam::DVec3;
use polyreduce_config::ReduceTargets;
use polyreduce_mesh::{CheckMode, PolyMesh};
use tracing::{debug, trace};

use crate::attributes::{AttributeSet, CornerAttributes};
use crate::collapse::{SurvivorPosition, contract_with_attributes, lerp, locate_edge};
use crate::decimator::{Goal, StopReason};
use crate::error::{DecimateError, ReplayError};
use crate::history::{HistoryEvent, HistoryLog};

/// Where collapse survivors are placed during replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PositionSource {
    /// The recorded target, reproducing the optimizer bit for bit
    #[default]
    Recorded,
    /// `lerp(from, to, bias)` of the mesh being replayed onto, for rest
    /// meshes that share topology but not positions
    Interpolated,
}

/// Where a replay stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOutcome {
    pub final_polygons: usize,
    pub final_points: usize,
    /// Events applied by this call
    pub applied: usize,
    /// Index of the first event not yet applied
    pub cursor: usize,
    pub stop_reason: StopReason,
}

/// Applies history events to a mesh, resumable towards smaller targets.
#[derive(Debug, Clone)]
pub struct Replayer {
    mesh: PolyMesh,
    attrs: CornerAttributes,
    positions: PositionSource,
    cursor: usize,
    initial_polygons: usize,
    initial_points: usize,
}

impl Replayer {
    /// Prepare `mesh` and its attributes for replay. The mesh must be the
    /// decimator's input, or share its topology when positions are
    /// interpolated.
    pub fn new(mut mesh: PolyMesh, attributes: &AttributeSet) -> Result<Self, ReplayError> {
        if mesh.num_polygons() == 0 {
            return Err(DecimateError::EmptyMesh.into());
        }
        if let Some(p) = mesh.point_ids().find(|&p| !mesh.position(p).is_finite()) {
            return Err(DecimateError::NonFinitePosition(p.0).into());
        }
        mesh.validate().map_err(DecimateError::from)?;
        mesh.ensure_incidence();
        mesh.check_manifold().map_err(DecimateError::from)?;
        let attrs = CornerAttributes::resolve(&mesh, attributes)?;

        let initial_polygons = mesh.num_polygons();
        let initial_points = mesh.num_points();
        Ok(Self {
            mesh,
            attrs,
            positions: PositionSource::Recorded,
            cursor: 0,
            initial_polygons,
            initial_points,
        })
    }

    pub fn with_positions(mut self, positions: PositionSource) -> Self {
        self.positions = positions;
        self
    }

    /// Apply events from the cursor on until `targets` stop the replay or
    /// the log ends.
    ///
    /// Batches are all or nothing: the stop test runs only at their start,
    /// and a failure inside one restores the state it began from. After an
    /// error the replayer is left at the last consistent event boundary.
    pub fn advance(&mut self, history: &HistoryLog, targets: &ReduceTargets) -> Result<ReplayOutcome, ReplayError> {
        targets.validate().map_err(DecimateError::from)?;
        let goal = Goal::new(targets, self.initial_polygons, self.initial_points);
        let events = history.events();
        let start = self.cursor;

        let stop_reason = loop {
            let Some(&event) = events.get(self.cursor) else {
                let reached = goal.reached(self.mesh.num_polygons(), self.mesh.num_points());
                break if reached {
                    StopReason::TargetReached
                } else {
                    StopReason::Exhausted
                };
            };
            let (polygons, points) = (self.mesh.num_polygons(), self.mesh.num_points());
            match event {
                HistoryEvent::BatchStart { cost } => {
                    if let Some(reason) = goal.stop(cost as f64, polygons, points) {
                        break reason;
                    }
                    self.apply_batch(events)?;
                }
                HistoryEvent::Collapse { cost, .. } => {
                    if let Some(reason) = goal.stop(cost as f64, polygons, points) {
                        break reason;
                    }
                    self.apply(self.cursor, event)?;
                    self.cursor += 1;
                }
                HistoryEvent::Dissolve { .. } => {
                    if goal.polygons_reached(polygons) {
                        break StopReason::TargetReached;
                    }
                    self.apply(self.cursor, event)?;
                    self.cursor += 1;
                }
                HistoryEvent::VertexMerge { .. } | HistoryEvent::BatchEnd => {
                    self.apply(self.cursor, event)?;
                    self.cursor += 1;
                }
            }
        };

        debug!(
            "Replayer::advance: {:?} at event {} of {}, {} polygons",
            stop_reason,
            self.cursor,
            events.len(),
            self.mesh.num_polygons()
        );
        Ok(ReplayOutcome {
            final_polygons: self.mesh.num_polygons(),
            final_points: self.mesh.num_points(),
            applied: self.cursor - start,
            cursor: self.cursor,
            stop_reason,
        })
    }

    /// Apply the batch opening at the cursor, through its `BatchEnd`.
    fn apply_batch(&mut self, events: &[HistoryEvent]) -> Result<(), ReplayError> {
        let open = self.cursor;
        let close = events[open..]
            .iter()
            .position(|e| matches!(e, HistoryEvent::BatchEnd))
            .map(|offset| open + offset)
            .ok_or(ReplayError::OpenBatch(open))?;

        let snapshot = (self.mesh.clone(), self.attrs.clone());
        for index in open + 1..close {
            if let Err(e) = self.apply(index, events[index]) {
                (self.mesh, self.attrs) = snapshot;
                return Err(e);
            }
        }
        trace!("Replayer: batch {}..={} applied", open, close);
        self.cursor = close + 1;
        Ok(())
    }

    fn apply(&mut self, index: usize, event: HistoryEvent) -> Result<(), ReplayError> {
        match event {
            HistoryEvent::BatchStart { .. } | HistoryEvent::BatchEnd => Ok(()),
            HistoryEvent::VertexMerge { from, to, channel } => {
                let in_range = (channel as usize) < self.attrs.channel_count()
                    && self.mesh.is_half_edge_alive(from)
                    && self.mesh.is_half_edge_alive(to);
                if !in_range {
                    let corner = if self.mesh.is_half_edge_alive(from) { to.0 } else { from.0 };
                    return Err(ReplayError::BadVertexMerge { index, corner, channel });
                }
                let value = self.attrs.value(channel as usize, to).to_vec();
                self.attrs.set_value(channel as usize, from, &value);
                Ok(())
            }
            HistoryEvent::Collapse {
                from,
                to,
                target,
                bias,
                ..
            } => {
                let missing = ReplayError::MissingEdge {
                    index,
                    from: from.0,
                    to: to.0,
                };
                if !self.mesh.is_point_alive(from) || !self.mesh.is_point_alive(to) {
                    return Err(missing);
                }
                locate_edge(&self.mesh, from, to).ok_or(missing)?;
                let position = match self.positions {
                    PositionSource::Recorded => SurvivorPosition::Recorded(target),
                    PositionSource::Interpolated => SurvivorPosition::Exact(lerp(
                        self.mesh.position(from),
                        self.mesh.position(to),
                        bias as f64,
                    )),
                };
                contract_with_attributes(
                    &mut self.mesh,
                    &mut self.attrs,
                    from,
                    to,
                    position,
                    bias as f64,
                    CheckMode::Full,
                )
                .map_err(|source| ReplayError::Rejected { index, source })?;
                Ok(())
            }
            HistoryEvent::Dissolve { from, to, next, .. } => {
                let he = if self.mesh.is_point_alive(from) && self.mesh.is_point_alive(to) {
                    self.mesh.find_half_edge(from, to)
                } else {
                    None
                };
                let he = he.ok_or(ReplayError::MissingEdge {
                    index,
                    from: from.0,
                    to: to.0,
                })?;
                let found = self.mesh.dest_point(self.mesh.next(he));
                if found != next {
                    return Err(ReplayError::DissolveMismatch {
                        index,
                        expected: next.0,
                        found: found.0,
                    });
                }
                self.mesh
                    .dissolve(he)
                    .map_err(|source| ReplayError::Rejected { index, source })?;
                Ok(())
            }
        }
    }

    pub fn mesh(&self) -> &PolyMesh {
        &self.mesh
    }

    pub fn attributes(&self) -> &CornerAttributes {
        &self.attrs
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Positions of every point slot, as replayed so far.
    pub fn positions(&self) -> Vec<DVec3> {
        self.mesh.positions()
    }

    pub fn into_parts(self) -> (PolyMesh, CornerAttributes) {
        (self.mesh, self.attrs)
    }
}

/// Replay `history` onto `mesh` in one go.
pub fn reduce_from_history(
    mesh: PolyMesh,
    attributes: &AttributeSet,
    history: &HistoryLog,
    targets: &ReduceTargets,
    positions: PositionSource,
) -> Result<(PolyMesh, CornerAttributes, ReplayOutcome), ReplayError> {
    let mut replayer = Replayer::new(mesh, attributes)?.with_positions(positions);
    let outcome = replayer.advance(history, targets)?;
    let (mesh, attrs) = replayer.into_parts();
    Ok((mesh, attrs, outcome))
}
