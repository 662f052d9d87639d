//! Edge collapse shared by the optimizer and replay.
//!
//! Both paths go through [`contract_with_attributes`] so that the same
//! recorded event produces bit-identical topology, positions and corner
//! values no matter who applies it.

use glam::DVec3;
use polyreduce_mesh::{
    CheckMode, ContractError, Contraction, HalfEdgeId, PointId, PolyMesh, PolygonId,
    newell_normal,
};

use crate::attributes::CornerAttributes;
use crate::wedge::plan_collapse;

/// Where the survivor of a collapse ends up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurvivorPosition {
    /// A stored single-precision target
    Recorded([f32; 3]),
    /// An exact position
    Exact(DVec3),
}

impl SurvivorPosition {
    /// Resolve against the survivor's current position.
    ///
    /// A recorded target equal to the rounded current position leaves the
    /// point where it is, so a survivor that never moves keeps its full
    /// precision.
    pub fn resolve(self, current: DVec3) -> DVec3 {
        match self {
            SurvivorPosition::Exact(p) => p,
            SurvivorPosition::Recorded(target) => {
                if round(current) == target {
                    current
                } else {
                    DVec3::new(target[0] as f64, target[1] as f64, target[2] as f64)
                }
            }
        }
    }
}

pub fn round(p: DVec3) -> [f32; 3] {
    [p.x as f32, p.y as f32, p.z as f32]
}

/// `a` to `b` by `t`, returning `b` exactly at `t = 1`.
pub fn lerp(a: DVec3, b: DVec3, t: f64) -> DVec3 {
    a * (1.0 - t) + b * t
}

/// The half-edge to contract so that `removed` merges into `survivor`.
pub fn locate_edge(mesh: &PolyMesh, removed: PointId, survivor: PointId) -> Option<(HalfEdgeId, bool)> {
    if let Some(he) = mesh.find_half_edge(removed, survivor) {
        return Some((he, true));
    }
    mesh.find_half_edge(survivor, removed).map(|he| (he, false))
}

/// Contract `removed` into `survivor`, carrying corner attributes along.
///
/// Paired wedges take `lerp(removed, survivor, bias)` of their seed
/// values; seam flags follow half-edges stitched together by deleted
/// triangles. A missing edge reports `ContractError::Dead`.
pub fn contract_with_attributes(
    mesh: &mut PolyMesh,
    attrs: &mut CornerAttributes,
    removed: PointId,
    survivor: PointId,
    position: SurvivorPosition,
    bias: f64,
    check: CheckMode,
) -> Result<Contraction, ContractError> {
    let (he, onto_destination) = locate_edge(mesh, removed, survivor).ok_or(ContractError::Dead)?;
    if check == CheckMode::Full {
        mesh.can_contract(he, onto_destination)?;
    }
    let plan = plan_collapse(mesh, attrs, removed, survivor, bias);
    let destination = position.resolve(mesh.position(survivor));
    let halves: Vec<HalfEdgeId> = std::iter::once(he).chain(mesh.twin(he)).collect();

    let contraction = mesh.contract(he, onto_destination, CheckMode::Skip)?;
    plan.apply(attrs);
    attrs.stitch_seams(&contraction.stitched);
    attrs.inherit_seam_point(&halves, removed, survivor);
    mesh.set_position(survivor, destination);
    Ok(contraction)
}

/// Whether moving `removed` and `survivor` to `target` turns any polygon
/// around them by more than `max_deviation_degrees` or squashes it flat.
///
/// Polygons containing both points are judged by what is left of them;
/// triangles that vanish are ignored.
pub fn would_flip(
    mesh: &PolyMesh,
    removed: PointId,
    survivor: PointId,
    target: DVec3,
    max_deviation_degrees: f64,
) -> bool {
    let min_cos = max_deviation_degrees.to_radians().cos();
    let mut polygons: Vec<PolygonId> = mesh.point_polygons(removed);
    polygons.extend(mesh.point_polygons(survivor));
    polygons.sort_unstable();
    polygons.dedup();

    for poly in polygons {
        let before = mesh.polygon_area_normal(poly);
        let before_len2 = before.length_squared();
        if before_len2 <= f64::EPSILON * f64::EPSILON {
            continue;
        }

        let mut points: Vec<PointId> = mesh
            .polygon_points(poly)
            .into_iter()
            .map(|p| if p == removed { survivor } else { p })
            .collect();
        points.dedup();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            continue;
        }

        let moved: Vec<DVec3> = points
            .iter()
            .map(|&p| if p == survivor { target } else { mesh.position(p) })
            .collect();
        let after = newell_normal(&moved);
        let after_len2 = after.length_squared();
        if after_len2 <= f64::EPSILON * before_len2 {
            return true;
        }
        let cos = before.dot(after) / (before_len2.sqrt() * after_len2.sqrt());
        if cos < min_cos {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeChannel, AttributeSet};
    use crate::fixtures;

    #[test]
    fn test_locate_edge_direction() {
        let mesh = fixtures::square();
        let (he, onto) = locate_edge(&mesh, PointId(0), PointId(1)).unwrap();
        assert!(onto);
        assert_eq!(mesh.source_point(he), PointId(0));
        let (he, onto) = locate_edge(&mesh, PointId(1), PointId(0)).unwrap();
        assert!(!onto);
        assert_eq!(mesh.source_point(he), PointId(0));
        assert!(locate_edge(&mesh, PointId(1), PointId(3)).is_none());
    }

    #[test]
    fn test_recorded_position_keeps_unmoved_survivor() {
        let current = DVec3::new(0.1, 0.2, 0.3);
        assert_eq!(SurvivorPosition::Recorded(round(current)).resolve(current), current);
        let moved = SurvivorPosition::Recorded([1.0, 2.0, 3.0]).resolve(current);
        assert_eq!(moved, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(lerp(DVec3::ZERO, current, 1.0), current);
    }

    #[test]
    fn test_contract_interpolates_attributes() {
        let mut mesh = fixtures::quad_grid(2);
        mesh.ensure_incidence();
        let values: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let set = AttributeSet::new().with_channel(AttributeChannel::per_point("t", 1, values));
        let mut attrs = CornerAttributes::resolve(&mesh, &set).unwrap();

        let target = DVec3::new(1.5, 1.0, 0.0);
        let result = contract_with_attributes(
            &mut mesh,
            &mut attrs,
            PointId(5),
            PointId(4),
            SurvivorPosition::Exact(target),
            0.5,
            CheckMode::Full,
        )
        .unwrap();
        assert_eq!(result.survivor, PointId(4));
        assert!(result.deleted_polygons.is_empty());
        assert_eq!(mesh.position(PointId(4)), target);
        assert_eq!(mesh.num_points(), 8);
        for corner in mesh.outgoing(PointId(4)) {
            assert_eq!(attrs.value(0, corner), &[4.5]);
        }
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_refused_contract_leaves_mesh_untouched() {
        let mut mesh = fixtures::square();
        mesh.ensure_incidence();
        let mut attrs = CornerAttributes::resolve(&mesh, &AttributeSet::new()).unwrap();
        // Collapsing the diagonal would leave points 1 and 3 without polygons
        let err = contract_with_attributes(
            &mut mesh,
            &mut attrs,
            PointId(0),
            PointId(2),
            SurvivorPosition::Exact(DVec3::ZERO),
            0.0,
            CheckMode::Full,
        )
        .unwrap_err();
        assert_eq!(err, ContractError::Disconnect);
        assert_eq!(mesh.num_points(), 4);
        assert_eq!(mesh.position(PointId(2)), DVec3::new(1.0, 1.0, 0.0));

        assert_eq!(
            contract_with_attributes(
                &mut mesh,
                &mut attrs,
                PointId(1),
                PointId(3),
                SurvivorPosition::Exact(DVec3::ZERO),
                0.0,
                CheckMode::Full,
            )
            .unwrap_err(),
            ContractError::Dead
        );
    }

    #[test]
    fn test_flip_detection() {
        let mesh = fixtures::quad_grid(2);
        // Sliding the center within its fan is harmless
        assert!(!would_flip(&mesh, PointId(4), PointId(5), DVec3::new(1.5, 1.0, 0.0), 90.0));
        // Dragging it across the far side folds polygons over
        assert!(would_flip(&mesh, PointId(4), PointId(5), DVec3::new(-1.0, 1.0, 0.0), 90.0));
        // Lifting it out of plane only tilts the fan
        let lifted = DVec3::new(1.5, 1.0, 0.2);
        assert!(!would_flip(&mesh, PointId(4), PointId(5), lifted, 45.0));
        assert!(would_flip(&mesh, PointId(4), PointId(5), lifted, 1.0));
    }
}
