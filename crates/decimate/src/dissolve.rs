//! Merging coplanar triangle pairs into quads.
//!
//! Runs once after the collapse loop. Only smooth interior edges between
//! two triangles qualify, and only when the resulting quad is strictly
//! convex.

use glam::DVec3;
use polyreduce_mesh::{HalfEdgeId, PointId, PolyMesh};

use crate::attributes::CornerAttributes;
use crate::constraints::{Constraints, EdgeKind, edge_key};

/// An edge whose two triangles may become one quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoplanarPair {
    pub edge: HalfEdgeId,
    /// Angle between the two triangle normals, in radians
    pub deviation: f64,
    pub key: (PointId, PointId),
}

/// The quad `b, c, a, d` left after removing `a -> b`, where `c` closes
/// the triangle on `he`'s side and `d` the one across.
pub(crate) fn merged_quad(mesh: &PolyMesh, he: HalfEdgeId) -> Option<[PointId; 4]> {
    let twin = mesh.twin(he)?;
    let a = mesh.source_point(he);
    let b = mesh.dest_point(he);
    let c = mesh.dest_point(mesh.next(he));
    let d = mesh.dest_point(mesh.next(twin));
    Some([b, c, a, d])
}

fn strictly_convex(corners: &[DVec3; 4], normal: DVec3) -> bool {
    let scale = corners
        .iter()
        .map(|p| (*p - corners[0]).length_squared())
        .fold(0.0, f64::max);
    let eps = 1e-12 * scale;
    (0..4).all(|i| {
        let e1 = corners[(i + 1) % 4] - corners[i];
        let e2 = corners[(i + 2) % 4] - corners[(i + 1) % 4];
        e1.cross(e2).dot(normal) > eps
    })
}

/// Deviation angle of `he` if dissolving it is allowed.
pub(crate) fn dissolvable(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    constraints: &Constraints,
    he: HalfEdgeId,
    min_cos: f64,
) -> Option<f64> {
    let twin = mesh.twin(he)?;
    let (p, q) = (mesh.polygon_of(he)?, mesh.polygon_of(twin)?);
    if p == q || !mesh.is_triangle(p) || !mesh.is_triangle(q) {
        return None;
    }
    if !mesh.in_group(p) || !mesh.in_group(q) {
        return None;
    }
    let (a, b) = (mesh.source_point(he), mesh.dest_point(he));
    if constraints.is_hard_edge(a, b) || constraints.edge_kind(mesh, attrs, he) != EdgeKind::Smooth {
        return None;
    }

    let (n1, n2) = (mesh.polygon_normal(p), mesh.polygon_normal(q));
    if n1 == DVec3::ZERO || n2 == DVec3::ZERO {
        return None;
    }
    let cos = n1.dot(n2).clamp(-1.0, 1.0);
    if cos < min_cos {
        return None;
    }

    let quad = merged_quad(mesh, he)?;
    let corners = quad.map(|point| mesh.position(point));
    let normal = (n1 + n2).normalize_or_zero();
    if !strictly_convex(&corners, normal) {
        return None;
    }
    Some(cos.acos())
}

/// Every dissolvable edge, flattest first, ties broken by point pair.
pub fn coplanar_pairs(
    mesh: &PolyMesh,
    attrs: &CornerAttributes,
    constraints: &Constraints,
    tolerance_degrees: f64,
) -> Vec<CoplanarPair> {
    let min_cos = tolerance_degrees.to_radians().cos();
    let mut pairs: Vec<CoplanarPair> = mesh
        .edge_ids()
        .filter_map(|he| {
            let deviation = dissolvable(mesh, attrs, constraints, he, min_cos)?;
            Some(CoplanarPair {
                edge: he,
                deviation,
                key: edge_key(mesh.source_point(he), mesh.dest_point(he)),
            })
        })
        .collect();
    pairs.sort_by(|x, y| x.deviation.total_cmp(&y.deviation).then(x.key.cmp(&y.key)));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeSet;
    use crate::constraints::Hardening;
    use crate::fixtures;
    use polyreduce_config::DecimateConfig;

    fn setup(mesh: &PolyMesh, hardening: &Hardening) -> (CornerAttributes, Constraints) {
        let attrs = CornerAttributes::resolve(mesh, &AttributeSet::new()).unwrap();
        let constraints =
            Constraints::resolve(mesh, &attrs, hardening, &DecimateConfig::default()).unwrap();
        (attrs, constraints)
    }

    #[test]
    fn test_flat_square_has_one_pair() {
        let mesh = fixtures::square();
        let (attrs, constraints) = setup(&mesh, &Hardening::default());
        let pairs = coplanar_pairs(&mesh, &attrs, &constraints, 1.0);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, (PointId(0), PointId(2)));
        assert!(pairs[0].deviation.abs() < 1e-12);

        let quad = merged_quad(&mesh, pairs[0].edge).unwrap();
        let mut sorted = quad.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![PointId(0), PointId(1), PointId(2), PointId(3)]);
    }

    #[test]
    fn test_folded_and_hard_edges_are_skipped() {
        let folded = fixtures::folded_square();
        let (attrs, constraints) = setup(&folded, &Hardening::default());
        assert!(coplanar_pairs(&folded, &attrs, &constraints, 1.0).is_empty());
        // A wide enough tolerance accepts the fold
        assert_eq!(coplanar_pairs(&folded, &attrs, &constraints, 90.0).len(), 1);

        let mesh = fixtures::square();
        let (attrs, constraints) = setup(&mesh, &Hardening::default().hard_edge(0, 2));
        assert!(coplanar_pairs(&mesh, &attrs, &constraints, 1.0).is_empty());
    }

    #[test]
    fn test_concave_quad_is_rejected() {
        // Point 2 is pushed in far enough to make the quad reflex there
        let positions = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(1.0, 0.5, 0.0),
            DVec3::new(1.0, 2.0, 0.0),
        ];
        let mut mesh = PolyMesh::from_polygons(&positions, &[vec![0u32, 1, 2], vec![0, 2, 3]]).unwrap();
        mesh.ensure_incidence();
        let (attrs, constraints) = setup(&mesh, &Hardening::default());
        assert!(coplanar_pairs(&mesh, &attrs, &constraints, 1.0).is_empty());
    }
}
