//! Append-only record of every accepted operation.
//!
//! The log is the only artifact needed to rebuild any intermediate level
//! of detail: replaying it against a fresh copy of the input applies the
//! same contractions, dissolves and attribute snaps in the same order.
//!
//! Two persisted forms exist:
//! - [`EventRecord`] - fixed-size `repr(C)` records for binary caches
//! - [`SerializedEvent`] - `{ op, from, to, extra, resultingPolygonCount }`
//!   objects for JSON

use bytemuck::Zeroable;
use polyreduce_mesh::{HalfEdgeId, PointId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One recorded operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistoryEvent {
    /// Opens an atomic group; `cost` is the group's queue priority
    BatchStart { cost: f32 },
    BatchEnd,
    /// Corner `from` took the value of corner `to` in `channel`
    VertexMerge {
        from: HalfEdgeId,
        to: HalfEdgeId,
        channel: u32,
    },
    /// Point `from` was merged into `to`, which moved to `target`
    Collapse {
        from: PointId,
        to: PointId,
        target: [f32; 3],
        cost: f32,
        /// Position of `target` along `from -> to`, in [0, 1]
        bias: f32,
        resulting_polygons: u32,
    },
    /// Edge `from -> to` was removed; its polygon continues to `next`
    Dissolve {
        from: PointId,
        to: PointId,
        next: PointId,
        resulting_polygons: u32,
    },
}

impl HistoryEvent {
    /// Cost compared against the error bounds, for events that have one.
    pub fn cost(&self) -> Option<f32> {
        match *self {
            HistoryEvent::BatchStart { cost } | HistoryEvent::Collapse { cost, .. } => Some(cost),
            _ => None,
        }
    }

    pub fn resulting_polygons(&self) -> Option<u32> {
        match *self {
            HistoryEvent::Collapse {
                resulting_polygons, ..
            }
            | HistoryEvent::Dissolve {
                resulting_polygons, ..
            } => Some(resulting_polygons),
            _ => None,
        }
    }
}

/// Errors decoding a persisted history.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryFormatError {
    #[error("unknown history op '{0}'")]
    UnknownOp(String),
    #[error("unknown history op code {0}")]
    UnknownOpCode(u32),
    #[error("'{op}' expects {expected} extra values, found {found}")]
    ExtraLength {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("extra value {0} is not a valid index")]
    NotAnIndex(f64),
}

const OP_BATCH_START: u32 = 0;
const OP_BATCH_END: u32 = 1;
const OP_VERTEX_MERGE: u32 = 2;
const OP_COLLAPSE: u32 = 3;
const OP_DISSOLVE: u32 = 4;

/// Fixed-size binary form of one event.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct EventRecord {
    pub op: u32,
    pub from: u32,
    pub to: u32,
    pub resulting_polygons: u32,
    /// Channel of a vertex merge, continuation point of a dissolve
    pub aux: u32,
    /// Target xyz, cost, bias of a collapse; cost of a batch start
    pub extra: [f32; 5],
}

impl From<&HistoryEvent> for EventRecord {
    fn from(event: &HistoryEvent) -> Self {
        let mut record = EventRecord::zeroed();
        match *event {
            HistoryEvent::BatchStart { cost } => {
                record.op = OP_BATCH_START;
                record.extra[0] = cost;
            }
            HistoryEvent::BatchEnd => record.op = OP_BATCH_END,
            HistoryEvent::VertexMerge { from, to, channel } => {
                record.op = OP_VERTEX_MERGE;
                record.from = from.0;
                record.to = to.0;
                record.aux = channel;
            }
            HistoryEvent::Collapse {
                from,
                to,
                target,
                cost,
                bias,
                resulting_polygons,
            } => {
                record.op = OP_COLLAPSE;
                record.from = from.0;
                record.to = to.0;
                record.resulting_polygons = resulting_polygons;
                record.extra = [target[0], target[1], target[2], cost, bias];
            }
            HistoryEvent::Dissolve {
                from,
                to,
                next,
                resulting_polygons,
            } => {
                record.op = OP_DISSOLVE;
                record.from = from.0;
                record.to = to.0;
                record.aux = next.0;
                record.resulting_polygons = resulting_polygons;
            }
        }
        record
    }
}

impl TryFrom<&EventRecord> for HistoryEvent {
    type Error = HistoryFormatError;

    fn try_from(record: &EventRecord) -> Result<Self, Self::Error> {
        let event = match record.op {
            OP_BATCH_START => HistoryEvent::BatchStart {
                cost: record.extra[0],
            },
            OP_BATCH_END => HistoryEvent::BatchEnd,
            OP_VERTEX_MERGE => HistoryEvent::VertexMerge {
                from: HalfEdgeId(record.from),
                to: HalfEdgeId(record.to),
                channel: record.aux,
            },
            OP_COLLAPSE => HistoryEvent::Collapse {
                from: PointId(record.from),
                to: PointId(record.to),
                target: [record.extra[0], record.extra[1], record.extra[2]],
                cost: record.extra[3],
                bias: record.extra[4],
                resulting_polygons: record.resulting_polygons,
            },
            OP_DISSOLVE => HistoryEvent::Dissolve {
                from: PointId(record.from),
                to: PointId(record.to),
                next: PointId(record.aux),
                resulting_polygons: record.resulting_polygons,
            },
            other => return Err(HistoryFormatError::UnknownOpCode(other)),
        };
        Ok(event)
    }
}

/// Portable form of one event.
///
/// `extra` holds `[x, y, z, cost, bias]` for a collapse, `[next]` for a
/// dissolve, `[channel]` for a vertex merge and `[cost]` for a batch start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEvent {
    pub op: String,
    pub from: u32,
    pub to: u32,
    pub extra: Vec<f64>,
    pub resulting_polygon_count: u32,
}

impl From<&HistoryEvent> for SerializedEvent {
    fn from(event: &HistoryEvent) -> Self {
        let (op, from, to, extra, count) = match *event {
            HistoryEvent::BatchStart { cost } => ("batch-start", 0, 0, vec![cost as f64], 0),
            HistoryEvent::BatchEnd => ("batch-end", 0, 0, Vec::new(), 0),
            HistoryEvent::VertexMerge { from, to, channel } => {
                ("vertex-merge", from.0, to.0, vec![channel as f64], 0)
            }
            HistoryEvent::Collapse {
                from,
                to,
                target,
                cost,
                bias,
                resulting_polygons,
            } => (
                "collapse",
                from.0,
                to.0,
                vec![
                    target[0] as f64,
                    target[1] as f64,
                    target[2] as f64,
                    cost as f64,
                    bias as f64,
                ],
                resulting_polygons,
            ),
            HistoryEvent::Dissolve {
                from,
                to,
                next,
                resulting_polygons,
            } => (
                "dissolve",
                from.0,
                to.0,
                vec![next.0 as f64],
                resulting_polygons,
            ),
        };
        SerializedEvent {
            op: op.to_string(),
            from,
            to,
            extra,
            resulting_polygon_count: count,
        }
    }
}

fn expect_extra(op: &'static str, extra: &[f64], expected: usize) -> Result<(), HistoryFormatError> {
    if extra.len() == expected {
        Ok(())
    } else {
        Err(HistoryFormatError::ExtraLength {
            op,
            expected,
            found: extra.len(),
        })
    }
}

fn whole(value: f64) -> Result<u32, HistoryFormatError> {
    if value.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&value) {
        Ok(value as u32)
    } else {
        Err(HistoryFormatError::NotAnIndex(value))
    }
}

impl TryFrom<&SerializedEvent> for HistoryEvent {
    type Error = HistoryFormatError;

    fn try_from(event: &SerializedEvent) -> Result<Self, Self::Error> {
        let extra = &event.extra;
        match event.op.as_str() {
            "batch-start" => {
                expect_extra("batch-start", extra, 1)?;
                Ok(HistoryEvent::BatchStart {
                    cost: extra[0] as f32,
                })
            }
            "batch-end" => Ok(HistoryEvent::BatchEnd),
            "vertex-merge" => {
                expect_extra("vertex-merge", extra, 1)?;
                Ok(HistoryEvent::VertexMerge {
                    from: HalfEdgeId(event.from),
                    to: HalfEdgeId(event.to),
                    channel: whole(extra[0])?,
                })
            }
            "collapse" => {
                expect_extra("collapse", extra, 5)?;
                Ok(HistoryEvent::Collapse {
                    from: PointId(event.from),
                    to: PointId(event.to),
                    target: [extra[0] as f32, extra[1] as f32, extra[2] as f32],
                    cost: extra[3] as f32,
                    bias: extra[4] as f32,
                    resulting_polygons: event.resulting_polygon_count,
                })
            }
            "dissolve" => {
                expect_extra("dissolve", extra, 1)?;
                Ok(HistoryEvent::Dissolve {
                    from: PointId(event.from),
                    to: PointId(event.to),
                    next: PointId(whole(extra[0])?),
                    resulting_polygons: event.resulting_polygon_count,
                })
            }
            other => Err(HistoryFormatError::UnknownOp(other.to_string())),
        }
    }
}

/// Ordered, append-only event log.
///
/// A log is sealed once a dissolve pass has run: dissolves turn triangles
/// into quads the collapse scheduler never saw, so no further collapses
/// may be appended after them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryLog {
    events: Vec<HistoryEvent>,
    sealed: bool,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn push(&mut self, event: HistoryEvent) {
        debug_assert!(!self.sealed, "append to a sealed history");
        self.events.push(event);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Number of collapse events.
    pub fn collapse_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HistoryEvent::Collapse { .. }))
            .count()
    }

    pub fn to_records(&self) -> Vec<EventRecord> {
        self.events.iter().map(EventRecord::from).collect()
    }

    pub fn from_records(records: &[EventRecord]) -> Result<Self, HistoryFormatError> {
        let events = records
            .iter()
            .map(HistoryEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_events(events))
    }

    /// Raw bytes of the binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.to_records()).to_vec()
    }

    /// Decode the binary form. Trailing bytes that do not fill a whole
    /// record are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HistoryFormatError> {
        let size = std::mem::size_of::<EventRecord>();
        if bytes.len() % size != 0 {
            return Err(HistoryFormatError::ExtraLength {
                op: "record",
                expected: size,
                found: bytes.len() % size,
            });
        }
        let records: Vec<EventRecord> = bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Self::from_records(&records)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn from_events(events: Vec<HistoryEvent>) -> Self {
        let sealed = events
            .iter()
            .any(|e| matches!(e, HistoryEvent::Dissolve { .. }));
        Self { events, sealed }
    }
}

impl Serialize for HistoryLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let events: Vec<SerializedEvent> = self.events.iter().map(SerializedEvent::from).collect();
        events.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HistoryLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<SerializedEvent>::deserialize(deserializer)?;
        let events = raw
            .iter()
            .map(HistoryEvent::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        Ok(Self::from_events(events))
    }
}
