//! Hand-built meshes shared by the unit tests.

use glam::DVec3;
use polyreduce_mesh::{PointId, PolyMesh};

use crate::attributes::{AttributeChannel, AttributeSet};

/// Channel index of the per-corner normals in [`seam_strip_attributes`]
pub const NORMAL: usize = 0;
/// Channel index of the per-point UVs in [`seam_strip_attributes`]
pub const UV: usize = 1;

fn build(positions: &[DVec3], polygons: &[Vec<u32>]) -> PolyMesh {
    let mut mesh = PolyMesh::from_polygons(positions, polygons).unwrap();
    mesh.ensure_incidence();
    mesh
}

/// Unit square split along the 0-2 diagonal.
pub fn square() -> PolyMesh {
    build(
        &[
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ],
        &[vec![0, 1, 2], vec![0, 2, 3]],
    )
}

/// The square with point 3 lifted, folding it about 55 degrees along 0-2.
pub fn folded_square() -> PolyMesh {
    build(
        &[
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 1.0),
        ],
        &[vec![0, 1, 2], vec![0, 2, 3]],
    )
}

/// Regular icosahedron with outward winding.
pub fn icosahedron() -> PolyMesh {
    let t = (1.0 + 5.0f64.sqrt()) / 2.0;
    let positions = [
        DVec3::new(-1.0, t, 0.0),
        DVec3::new(1.0, t, 0.0),
        DVec3::new(-1.0, -t, 0.0),
        DVec3::new(1.0, -t, 0.0),
        DVec3::new(0.0, -1.0, t),
        DVec3::new(0.0, 1.0, t),
        DVec3::new(0.0, -1.0, -t),
        DVec3::new(0.0, 1.0, -t),
        DVec3::new(t, 0.0, -1.0),
        DVec3::new(t, 0.0, 1.0),
        DVec3::new(-t, 0.0, -1.0),
        DVec3::new(-t, 0.0, 1.0),
    ];
    let faces: [[u32; 3]; 20] = [
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];
    let polygons: Vec<Vec<u32>> = faces.iter().map(|f| f.to_vec()).collect();
    build(&positions, &polygons)
}

/// `n` x `n` unit quads in the z = 0 plane.
///
/// Point `(i, j)` has index `j * (n + 1) + i`.
pub fn quad_grid(n: u32) -> PolyMesh {
    let side = n + 1;
    let mut positions = Vec::new();
    for j in 0..side {
        for i in 0..side {
            positions.push(DVec3::new(i as f64, j as f64, 0.0));
        }
    }
    let mut polygons = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let a = j * side + i;
            polygons.push(vec![a, a + 1, a + side + 1, a + side]);
        }
    }
    build(&positions, &polygons)
}

/// [`quad_grid`] with a gentle height field, so that collapses have
/// distinct non-zero costs.
pub fn wavy_grid(n: u32) -> PolyMesh {
    let mut mesh = quad_grid(n);
    let ids: Vec<PointId> = mesh.point_ids().collect();
    for p in ids {
        let q = mesh.position(p);
        let z = 0.2 * (1.3 * q.x).sin() * (0.7 * q.y + 0.4).cos() + 0.05 * q.x * q.y / n as f64;
        mesh.set_position(p, DVec3::new(q.x, q.y, z));
    }
    mesh
}

/// Open tube of `n` quads around the z axis.
pub fn quad_tube(n: u32) -> PolyMesh {
    let mut positions = Vec::new();
    for z in [0.0, 1.0] {
        for i in 0..n {
            let angle = std::f64::consts::TAU * i as f64 / n as f64;
            positions.push(DVec3::new(angle.cos(), angle.sin(), z));
        }
    }
    let polygons: Vec<Vec<u32>> = (0..n)
        .map(|i| {
            let j = (i + 1) % n;
            vec![i, j, n + j, n + i]
        })
        .collect();
    build(&positions, &polygons)
}

/// 2 x 2 cells over x in [-1, 1], y in [0, 2], each split into two
/// triangles. Point `(i, j)` has index `j * 3 + i`; the column x = 0
/// (points 1, 4, 7) is where the left and right halves meet.
pub fn seam_strip() -> PolyMesh {
    let mut positions = Vec::new();
    for j in 0..3 {
        for i in 0..3 {
            positions.push(DVec3::new(i as f64 - 1.0, j as f64, 0.0));
        }
    }
    build(&positions, &seam_strip_polygons())
}

fn seam_strip_polygons() -> Vec<Vec<u32>> {
    let mut polygons = Vec::new();
    for j in 0..2 {
        for i in 0..2 {
            let a = j * 3 + i;
            polygons.push(vec![a, a + 1, a + 4]);
            polygons.push(vec![a, a + 4, a + 3]);
        }
    }
    polygons
}

/// Hard normals tilted away from the x = 0 seam, which is protected,
/// plus continuous UVs equal to the planar position.
pub fn seam_strip_attributes(mesh: &PolyMesh) -> AttributeSet {
    let left = [-0.5, 0.0, 0.866_025_4];
    let right = [0.5, 0.0, 0.866_025_4];
    let mut normals = Vec::new();
    for polygon in seam_strip_polygons() {
        // Cells with i = 0 lie left of the seam
        let value = if polygon[0] % 3 == 0 { left } else { right };
        for _ in &polygon {
            normals.extend_from_slice(&value);
        }
    }
    let uvs: Vec<f64> = mesh.positions().iter().flat_map(|p| [p.x, p.y]).collect();

    AttributeSet::new()
        .with_channel(
            AttributeChannel::per_corner("normal", 3, normals)
                .protect_seam(1, 4)
                .protect_seam(4, 7),
        )
        .with_channel(AttributeChannel::per_point("uv", 2, uvs))
}
