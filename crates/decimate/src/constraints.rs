//! Hardened points, feature edges and the initial position quadrics.

use std::collections::HashSet;

use polyreduce_config::DecimateConfig;
use polyreduce_mesh::{HalfEdgeId, PointId, PolyMesh};
use serde::{Deserialize, Serialize};

use crate::attributes::CornerAttributes;
use crate::error::DecimateError;
use crate::quadric::Quadric;
use crate::real::Real;

/// Caller-supplied features that must survive decimation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hardening {
    /// Points that never move and are never removed
    pub pinned_points: Vec<u32>,
    /// Edges whose endpoints are pinned
    pub hard_edges: Vec<(u32, u32)>,
    /// Edges that get crease planes in addition to any detected ones
    pub crease_edges: Vec<(u32, u32)>,
}

impl Hardening {
    pub fn pin(mut self, point: u32) -> Self {
        self.pinned_points.push(point);
        self
    }

    pub fn hard_edge(mut self, a: u32, b: u32) -> Self {
        self.hard_edges.push((a, b));
        self
    }

    pub fn crease(mut self, a: u32, b: u32) -> Self {
        self.crease_edges.push((a, b));
        self
    }
}

/// What kind of synthetic plane an edge receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Boundary,
    Crease,
    Seam,
    Smooth,
}

pub(crate) fn edge_key(a: PointId, b: PointId) -> (PointId, PointId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Resolved hardening state of a mesh.
#[derive(Debug, Clone)]
pub(crate) struct Constraints {
    pub hardened: Vec<bool>,
    pub creases: HashSet<(PointId, PointId)>,
    pub hard_edges: HashSet<(PointId, PointId)>,
    crease_cos: Option<f64>,
}

fn checked_edge(mesh: &PolyMesh, a: u32, b: u32) -> Result<(PointId, PointId), DecimateError> {
    for p in [a, b] {
        if p as usize >= mesh.point_capacity() {
            return Err(DecimateError::PointOutOfRange(p));
        }
    }
    let (pa, pb) = (PointId(a), PointId(b));
    if mesh.find_edge(pa, pb).is_none() {
        return Err(DecimateError::MissingEdge(a, b));
    }
    Ok(edge_key(pa, pb))
}

impl Constraints {
    pub fn resolve(
        mesh: &PolyMesh,
        attrs: &CornerAttributes,
        hardening: &Hardening,
        config: &DecimateConfig,
    ) -> Result<Self, DecimateError> {
        let mut hardened = vec![false; mesh.point_capacity()];
        for &p in &hardening.pinned_points {
            let slot = hardened
                .get_mut(p as usize)
                .ok_or(DecimateError::PointOutOfRange(p))?;
            *slot = true;
        }

        let mut hard_edges = HashSet::new();
        for &(a, b) in &hardening.hard_edges {
            let key = checked_edge(mesh, a, b)?;
            hardened[key.0.index()] = true;
            hardened[key.1.index()] = true;
            hard_edges.insert(key);
        }

        let mut creases = HashSet::new();
        for &(a, b) in &hardening.crease_edges {
            creases.insert(checked_edge(mesh, a, b)?);
        }

        let mut constraints = Self {
            hardened,
            creases,
            hard_edges,
            crease_cos: config
                .crease_angle_degrees
                .map(|deg| deg.to_radians().cos()),
        };

        for point in mesh.point_ids() {
            let boundary = config.harden_boundary && mesh.is_boundary_point(point);
            let seam = config.harden_seams
                && mesh.outgoing(point).into_iter().any(|h| {
                    attrs.is_seam(mesh, h) || attrs.is_seam(mesh, mesh.prev(h))
                });
            if boundary || seam || mesh.is_frozen(point) {
                constraints.hardened[point.index()] = true;
            }
        }
        Ok(constraints)
    }

    pub fn is_hardened(&self, point: PointId) -> bool {
        self.hardened.get(point.index()).copied().unwrap_or(false)
    }

    pub fn is_hard_edge(&self, a: PointId, b: PointId) -> bool {
        self.hard_edges.contains(&edge_key(a, b))
    }

    /// Classify an edge, preferring boundary over crease over seam.
    pub fn edge_kind(&self, mesh: &PolyMesh, attrs: &CornerAttributes, he: HalfEdgeId) -> EdgeKind {
        let Some(twin) = mesh.twin(he) else {
            return EdgeKind::Boundary;
        };
        let (a, b) = (mesh.source_point(he), mesh.dest_point(he));
        if self.creases.contains(&edge_key(a, b)) {
            return EdgeKind::Crease;
        }
        if let (Some(cos), Some(p), Some(q)) = (self.crease_cos, mesh.polygon_of(he), mesh.polygon_of(twin)) {
            let (n1, n2) = (mesh.polygon_normal(p), mesh.polygon_normal(q));
            if n1 != glam::DVec3::ZERO && n2 != glam::DVec3::ZERO && n1.dot(n2) < cos {
                return EdgeKind::Crease;
            }
        }
        if attrs.is_seam(mesh, he) {
            return EdgeKind::Seam;
        }
        EdgeKind::Smooth
    }
}

/// Area-weighted plane quadrics of the incident polygons, plus the
/// synthetic planes along boundary, crease and seam edges, scaled by the
/// per-point retention weight.
pub(crate) fn position_quadrics<T: Real>(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    constraints: &Constraints,
    config: &DecimateConfig,
) -> Vec<Quadric<T>> {
    let mut quadrics = vec![Quadric::zero(); mesh.point_capacity()];

    for poly in mesh.polygon_ids() {
        let area_normal = mesh.polygon_area_normal(poly);
        let area = 0.5 * area_normal.length();
        let plane = Quadric::from_plane(
            area_normal.normalize_or_zero(),
            mesh.polygon_centroid(poly),
            area,
        );
        for p in mesh.polygon_points(poly) {
            quadrics[p.index()] += plane;
        }
    }

    let weights = &config.weights;
    for he in mesh.edge_ids() {
        let kind = constraints.edge_kind(mesh, attrs, he);
        let weight = match kind {
            EdgeKind::Boundary => weights.boundary_weight,
            EdgeKind::Crease => weights.crease_weight,
            EdgeKind::Seam => weights.seam_weight,
            EdgeKind::Smooth => continue,
        };
        let (a, b) = (mesh.source_point(he), mesh.dest_point(he));
        let (pa, pb) = (mesh.position(a), mesh.position(b));
        for side in [Some(he), mesh.twin(he)].into_iter().flatten() {
            let Some(poly) = mesh.polygon_of(side) else {
                continue;
            };
            let plane = Quadric::from_edge_constraint(pa, pb, mesh.polygon_normal(poly), weight);
            quadrics[a.index()] += plane;
            quadrics[b.index()] += plane;
        }
    }

    for point in mesh.point_ids() {
        let w = attrs.point_weight(point);
        if w != 1.0 {
            quadrics[point.index()] = quadrics[point.index()].scaled(T::lit(w));
        }
    }
    quadrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeSet;
    use crate::fixtures;
    use crate::quadric::to_vector;

    #[test]
    fn test_boundary_hardening() {
        let mesh = fixtures::quad_grid(2);
        let attrs = CornerAttributes::resolve(&mesh, &AttributeSet::new()).unwrap();
        let config = DecimateConfig {
            harden_boundary: true,
            ..DecimateConfig::default()
        };
        let c = Constraints::resolve(&mesh, &attrs, &Hardening::default(), &config).unwrap();
        // Only the center of a 3x3 point grid is interior
        let hardened: Vec<usize> = (0..9).filter(|&i| c.hardened[i]).collect();
        assert_eq!(hardened, vec![0, 1, 2, 3, 5, 6, 7, 8]);
    }

    #[test]
    fn test_hard_edge_pins_endpoints() {
        let mesh = fixtures::quad_grid(2);
        let attrs = CornerAttributes::resolve(&mesh, &AttributeSet::new()).unwrap();
        let hardening = Hardening::default().hard_edge(4, 5).pin(0);
        let c = Constraints::resolve(&mesh, &attrs, &hardening, &DecimateConfig::default()).unwrap();
        assert!(c.is_hardened(PointId(0)));
        assert!(c.is_hardened(PointId(4)));
        assert!(c.is_hardened(PointId(5)));
        assert!(!c.is_hardened(PointId(1)));
        assert!(c.is_hard_edge(PointId(5), PointId(4)));

        let bad = Hardening::default().hard_edge(0, 8);
        assert!(matches!(
            Constraints::resolve(&mesh, &attrs, &bad, &DecimateConfig::default()),
            Err(DecimateError::MissingEdge(0, 8))
        ));
    }

    #[test]
    fn test_detected_crease() {
        let mesh = fixtures::folded_square();
        let attrs = CornerAttributes::resolve(&mesh, &AttributeSet::new()).unwrap();
        let config = DecimateConfig {
            crease_angle_degrees: Some(30.0),
            ..DecimateConfig::default()
        };
        let c = Constraints::resolve(&mesh, &attrs, &Hardening::default(), &config).unwrap();
        let fold = mesh.find_half_edge(PointId(0), PointId(2)).unwrap();
        assert_eq!(c.edge_kind(&mesh, &attrs, fold), EdgeKind::Crease);
        let rim = mesh.find_half_edge(PointId(0), PointId(1)).unwrap();
        assert_eq!(c.edge_kind(&mesh, &attrs, rim), EdgeKind::Boundary);
    }

    #[test]
    fn test_flat_interior_point_quadric_is_planar() {
        let mesh = fixtures::quad_grid(2);
        let attrs = CornerAttributes::resolve(&mesh, &AttributeSet::new()).unwrap();
        let config = DecimateConfig::default();
        let c = Constraints::resolve(&mesh, &attrs, &Hardening::default(), &config).unwrap();
        let quadrics = position_quadrics::<f64>(&mesh, &attrs, &c, &config);
        let center = &quadrics[4];
        // Sliding within the plane costs nothing, lifting off it does
        assert!(center.evaluate(&to_vector(glam::DVec3::new(0.3, 1.7, 0.0))).abs() < 1e-12);
        assert!((center.evaluate(&to_vector(glam::DVec3::new(1.0, 1.0, 1.0))) - 4.0).abs() < 1e-9);
        // A boundary point is held by its boundary planes
        assert!(quadrics[1].evaluate(&to_vector(glam::DVec3::new(1.0, -0.5, 0.0))) > 0.0);
    }
}
