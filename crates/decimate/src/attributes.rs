//! Attribute channels and their per-corner storage.
//!
//! Callers hand in channels stored per point or per polygon corner. Both
//! are expanded to one value per corner (half-edge slot) so that collapses
//! can write seams and wedge merges without caring about the input layout.

use std::collections::HashSet;

use polyreduce_mesh::{HalfEdgeId, PointId, PolyMesh};
use serde::{Deserialize, Serialize};

use crate::error::DecimateError;

/// How a channel's input values are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// One value per point slot
    Point,
    /// One value per polygon corner, in polygon-list order
    Corner,
}

/// One named attribute (UVs, normals, colors, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChannel {
    pub name: String,
    pub dimension: usize,
    pub weight: f64,
    /// Passive channels are interpolated through collapses but add no cost
    pub active: bool,
    pub storage: Storage,
    /// `dimension` values per point or per corner
    pub values: Vec<f64>,
    /// Point pairs whose edge no wedge of this channel may cross
    #[serde(default)]
    pub protected_seams: Vec<(u32, u32)>,
}

impl AttributeChannel {
    pub fn per_point(name: impl Into<String>, dimension: usize, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dimension,
            weight: 1.0,
            active: true,
            storage: Storage::Point,
            values,
            protected_seams: Vec::new(),
        }
    }

    pub fn per_corner(name: impl Into<String>, dimension: usize, values: Vec<f64>) -> Self {
        Self {
            storage: Storage::Corner,
            ..Self::per_point(name, dimension, values)
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn passive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn protect_seam(mut self, a: u32, b: u32) -> Self {
        self.protected_seams.push((a, b));
        self
    }
}

/// Everything attached to the mesh besides positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub channels: Vec<AttributeChannel>,
    /// Per-point retention weight scaling the position quadric
    #[serde(default)]
    pub point_weights: Option<Vec<f64>>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: AttributeChannel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_point_weights(mut self, weights: Vec<f64>) -> Self {
        self.point_weights = Some(weights);
        self
    }
}

/// A channel after expansion to corners.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub name: String,
    pub dimension: usize,
    pub weight: f64,
    pub active: bool,
    pub storage: Storage,
    values: Vec<f64>,
    /// Per half-edge: the edge is a protected seam for this channel
    protected: Vec<bool>,
    /// Per point: a protected seam was collapsed into this point
    seam_points: Vec<bool>,
}

/// Corner values, seam flags and seam points saved before speculative
/// collapses.
#[derive(Debug, Clone, Default)]
pub struct AttributeUndo {
    corners: Vec<(HalfEdgeId, Vec<Vec<f64>>, Vec<bool>)>,
    points: Vec<(PointId, Vec<bool>)>,
    seen_corners: HashSet<HalfEdgeId>,
    seen_points: HashSet<PointId>,
}

/// Corner-expanded attribute values, mutated alongside the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerAttributes {
    channels: Vec<ChannelState>,
    point_weights: Option<Vec<f64>>,
}

impl CornerAttributes {
    /// Check the channels against the mesh and expand them to corners.
    pub fn resolve(mesh: &PolyMesh, set: &AttributeSet) -> Result<Self, DecimateError> {
        let corner_count = mesh.half_edge_capacity();
        let point_count = mesh.point_capacity();
        let mut channels = Vec::with_capacity(set.channels.len());

        for channel in &set.channels {
            let name = channel.name.clone();
            let dim = channel.dimension;
            if dim == 0 {
                return Err(DecimateError::EmptyChannel { name });
            }
            if !channel.weight.is_finite() || channel.weight < 0.0 {
                return Err(DecimateError::ChannelWeight {
                    name,
                    weight: channel.weight,
                });
            }
            let slots = match channel.storage {
                Storage::Point => point_count,
                Storage::Corner => corner_count,
            };
            if channel.values.len() != slots * dim {
                return Err(DecimateError::ChannelLength {
                    name,
                    expected: slots * dim,
                    found: channel.values.len(),
                });
            }
            if channel.values.iter().any(|v| !v.is_finite()) {
                return Err(DecimateError::NonFiniteValue { name });
            }

            let values = match channel.storage {
                Storage::Corner => channel.values.clone(),
                Storage::Point => {
                    let mut expanded = Vec::with_capacity(corner_count * dim);
                    for corner in 0..corner_count {
                        let origin = mesh.source_point(HalfEdgeId(corner as u32)).index();
                        expanded.extend_from_slice(&channel.values[origin * dim..(origin + 1) * dim]);
                    }
                    expanded
                }
            };

            let mut protected = vec![false; corner_count];
            for &(a, b) in &channel.protected_seams {
                if a as usize >= point_count {
                    return Err(DecimateError::PointOutOfRange(a));
                }
                if b as usize >= point_count {
                    return Err(DecimateError::PointOutOfRange(b));
                }
                let forward = mesh.find_half_edge(PointId(a), PointId(b));
                let backward = mesh.find_half_edge(PointId(b), PointId(a));
                if forward.is_none() && backward.is_none() {
                    return Err(DecimateError::MissingEdge(a, b));
                }
                for he in [forward, backward].into_iter().flatten() {
                    protected[he.index()] = true;
                }
            }

            channels.push(ChannelState {
                name: channel.name.clone(),
                dimension: dim,
                weight: channel.weight,
                active: channel.active,
                storage: channel.storage,
                values,
                protected,
                seam_points: vec![false; point_count],
            });
        }

        if let Some(weights) = &set.point_weights {
            if weights.len() != point_count {
                return Err(DecimateError::PointWeightCount {
                    expected: point_count,
                    found: weights.len(),
                });
            }
            if let Some((i, &value)) = weights
                .iter()
                .enumerate()
                .find(|(_, w)| !w.is_finite() || **w < 0.0)
            {
                return Err(DecimateError::PointWeight {
                    point: i as u32,
                    value,
                });
            }
        }

        Ok(Self {
            channels,
            point_weights: set.point_weights.clone(),
        })
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn point_weight(&self, point: PointId) -> f64 {
        self.point_weights
            .as_ref()
            .and_then(|w| w.get(point.index()).copied())
            .unwrap_or(1.0)
    }

    pub fn value(&self, channel: usize, corner: HalfEdgeId) -> &[f64] {
        let state = &self.channels[channel];
        let dim = state.dimension;
        &state.values[corner.index() * dim..(corner.index() + 1) * dim]
    }

    pub fn set_value(&mut self, channel: usize, corner: HalfEdgeId, value: &[f64]) {
        let state = &mut self.channels[channel];
        let dim = state.dimension;
        state.values[corner.index() * dim..(corner.index() + 1) * dim].copy_from_slice(value);
    }

    /// Bitwise equality, so replays partition wedges exactly like the run
    /// that recorded them.
    pub fn values_equal(&self, channel: usize, a: HalfEdgeId, b: HalfEdgeId) -> bool {
        self.value(channel, a)
            .iter()
            .zip(self.value(channel, b))
            .all(|(x, y)| x.to_bits() == y.to_bits())
    }

    pub fn values_close(&self, channel: usize, a: HalfEdgeId, b: HalfEdgeId, tolerance: f64) -> bool {
        self.value(channel, a)
            .iter()
            .zip(self.value(channel, b))
            .all(|(x, y)| (x - y).abs() <= tolerance)
    }

    pub fn is_protected(&self, channel: usize, he: HalfEdgeId) -> bool {
        self.channels[channel].protected[he.index()]
    }

    /// True when any edge at `point` is a protected seam of `channel`, or
    /// was one before it collapsed into `point`.
    pub fn point_on_protected_seam(&self, mesh: &PolyMesh, channel: usize, point: PointId) -> bool {
        if self.channels[channel].seam_points[point.index()] {
            return true;
        }
        mesh.outgoing(point).into_iter().any(|h| {
            self.is_protected(channel, h) || self.is_protected(channel, mesh.prev(h))
        })
    }

    /// Keep the seam status of a collapsed edge on its survivor, which may
    /// otherwise lose every protected edge it had.
    pub fn inherit_seam_point(&mut self, halves: &[HalfEdgeId], removed: PointId, survivor: PointId) {
        for state in &mut self.channels {
            let collapsed = halves.iter().any(|h| state.protected[h.index()]);
            if collapsed || state.seam_points[removed.index()] {
                state.seam_points[survivor.index()] = true;
            }
        }
    }

    /// Whether any channel is discontinuous across the interior edge `he`.
    pub fn is_seam(&self, mesh: &PolyMesh, he: HalfEdgeId) -> bool {
        let Some(twin) = mesh.twin(he) else {
            return false;
        };
        (0..self.channels.len()).any(|ch| {
            self.is_protected(ch, he)
                || !self.values_equal(ch, he, mesh.next(twin))
                || !self.values_equal(ch, mesh.next(he), twin)
        })
    }

    /// Carry seam flags onto half-edges that became twins when a
    /// degenerate polygon was removed.
    pub fn stitch_seams(&mut self, stitched: &[(Option<HalfEdgeId>, Option<HalfEdgeId>)]) {
        for state in &mut self.channels {
            for &(a, b) in stitched {
                if let (Some(a), Some(b)) = (a, b) {
                    let flag = state.protected[a.index()] || state.protected[b.index()];
                    state.protected[a.index()] = flag;
                    state.protected[b.index()] = flag;
                }
            }
        }
    }

    /// Save the state of `corners` and `points` in every channel, each slot
    /// only the first time `undo` sees it.
    pub fn capture(&self, undo: &mut AttributeUndo, corners: &[HalfEdgeId], points: &[PointId]) {
        for &corner in corners {
            if undo.seen_corners.insert(corner) {
                let values = (0..self.channels.len())
                    .map(|ch| self.value(ch, corner).to_vec())
                    .collect();
                let flags = self.channels.iter().map(|s| s.protected[corner.index()]).collect();
                undo.corners.push((corner, values, flags));
            }
        }
        for &point in points {
            if undo.seen_points.insert(point) {
                let flags = self.channels.iter().map(|s| s.seam_points[point.index()]).collect();
                undo.points.push((point, flags));
            }
        }
    }

    pub fn restore(&mut self, undo: AttributeUndo) {
        for (corner, values, flags) in undo.corners {
            for (ch, (value, flag)) in values.iter().zip(flags).enumerate() {
                self.set_value(ch, corner, value);
                self.channels[ch].protected[corner.index()] = flag;
            }
        }
        for (point, flags) in undo.points {
            for (state, flag) in self.channels.iter_mut().zip(flags) {
                state.seam_points[point.index()] = flag;
            }
        }
    }

    /// Values in the layout the channel was supplied in.
    ///
    /// Point channels report the value of each live point's lowest corner;
    /// dead point slots read as zero.
    pub fn export(&self, mesh: &PolyMesh, channel: usize) -> Vec<f64> {
        let state = &self.channels[channel];
        match state.storage {
            Storage::Corner => state.values.clone(),
            Storage::Point => {
                let dim = state.dimension;
                let mut out = vec![0.0; mesh.point_capacity() * dim];
                for point in mesh.point_ids() {
                    if let Some(&corner) = mesh.outgoing(point).first() {
                        out[point.index() * dim..(point.index() + 1) * dim]
                            .copy_from_slice(self.value(channel, corner));
                    }
                }
                out
            }
        }
    }
}
