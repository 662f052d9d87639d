//! Quadric error forms.
//!
//! Theory: Garland & Heckbert, "Surface Simplification Using Quadric Error
//! Metrics", and Hoppe, "New Quadric Metric for Simplifying Meshes with
//! Appearance Attributes".
//!
//! Position error is a symmetric 4x4 form over homogeneous points. Each
//! attribute component of a wedge keeps the moments of the affine fits of
//! its incident triangles; minimizing over the attribute value yields
//! another 4x4 form that is simply added to the position quadric.

use std::ops::{Add, AddAssign};

use glam::DVec3;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::real::Real;

pub fn to_vector<T: Real>(p: DVec3) -> Vector3<T> {
    Vector3::new(T::lit(p.x), T::lit(p.y), T::lit(p.z))
}

pub fn to_dvec3<T: Real>(v: &Vector3<T>) -> DVec3 {
    DVec3::new(v.x.into_f64(), v.y.into_f64(), v.z.into_f64())
}

fn homogeneous<T: Real>(p: &Vector3<T>) -> Vector4<T> {
    Vector4::new(p.x, p.y, p.z, T::lit(1.0))
}

/// Squared distance to a set of weighted planes, as `[x 1] M [x 1]^T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric<T: Real> {
    pub m: Matrix4<T>,
}

impl<T: Real> Default for Quadric<T> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<T: Real> Quadric<T> {
    pub fn zero() -> Self {
        Self {
            m: Matrix4::zeros(),
        }
    }

    /// Plane through `point` with unit `normal`, scaled by `weight`.
    ///
    /// A zero normal (degenerate polygon) yields the zero quadric.
    pub fn from_plane(normal: DVec3, point: DVec3, weight: f64) -> Self {
        if normal == DVec3::ZERO || !weight.is_finite() || weight <= 0.0 {
            return Self::zero();
        }
        let d = -normal.dot(point);
        let plane = Vector4::new(
            T::lit(normal.x),
            T::lit(normal.y),
            T::lit(normal.z),
            T::lit(d),
        );
        Self {
            m: plane * plane.transpose() * T::lit(weight),
        }
    }

    /// Plane containing the edge `a -> b` and orthogonal to a surface with
    /// `surface_normal`, weighted by the squared edge length.
    pub fn from_edge_constraint(a: DVec3, b: DVec3, surface_normal: DVec3, weight: f64) -> Self {
        let edge = b - a;
        let normal = edge.cross(surface_normal).normalize_or_zero();
        Self::from_plane(normal, a, weight * edge.length_squared())
    }

    pub fn scaled(&self, factor: T) -> Self {
        Self { m: self.m * factor }
    }

    pub fn evaluate(&self, p: &Vector3<T>) -> T {
        let h = homogeneous(p);
        h.dot(&(self.m * h))
    }
}

impl<T: Real> Add for Quadric<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self { m: self.m + rhs.m }
    }
}

impl<T: Real> AddAssign for Quadric<T> {
    fn add_assign(&mut self, rhs: Self) {
        self.m += rhs.m;
    }
}

/// Find the point minimizing `m`.
///
/// The 3x3 system is solved through its eigen decomposition. Directions
/// whose eigenvalue falls below `eigenvalue_ratio` times the largest one
/// are left at `fallback`, so a flat or linear neighbourhood keeps the
/// point where it was anchored instead of shooting off along the null
/// space.
pub fn minimize<T: Real>(m: &Matrix4<T>, fallback: &Vector3<T>, eigenvalue_ratio: T) -> Vector3<T> {
    let a: Matrix3<T> = m.fixed_view::<3, 3>(0, 0).into_owned();
    let b: Vector3<T> = m.fixed_view::<3, 1>(0, 3).into_owned();

    let eigen = a.symmetric_eigen();
    let largest = eigen
        .eigenvalues
        .iter()
        .fold(T::lit(0.0), |acc, &l| if l.abs() > acc { l.abs() } else { acc });
    if largest <= T::lit(0.0) || !largest.is_finite() {
        return *fallback;
    }
    let threshold = largest * eigenvalue_ratio;

    let rhs = -(a * fallback + b);
    let mut x = *fallback;
    for i in 0..3 {
        let lambda = eigen.eigenvalues[i];
        if lambda > threshold && lambda > T::lit(0.0) {
            let v: Vector3<T> = eigen.eigenvectors.column(i).into_owned();
            x += v * (v.dot(&rhs) / lambda);
        }
    }

    if x.iter().all(|c| c.is_finite()) {
        x
    } else {
        *fallback
    }
}

/// Affine fit `value = g . p + d` of one attribute component over a
/// triangle, constrained to vary only within the triangle's plane.
///
/// Returns `None` when the triangle is too thin to determine a gradient.
pub fn attribute_gradient<T: Real>(
    positions: &[Vector3<T>; 3],
    normal: &Vector3<T>,
    values: [T; 3],
) -> Option<(Vector3<T>, T)> {
    let mut mat = Matrix4::<T>::zeros();
    let mut rhs = Vector4::<T>::zeros();
    for (i, p) in positions.iter().enumerate() {
        mat[(i, 0)] = p.x;
        mat[(i, 1)] = p.y;
        mat[(i, 2)] = p.z;
        mat[(i, 3)] = T::lit(1.0);
        rhs[i] = values[i];
    }
    mat[(3, 0)] = normal.x;
    mat[(3, 1)] = normal.y;
    mat[(3, 2)] = normal.z;

    // Constant value: the fit is trivial
    if values[0] == values[1] && values[1] == values[2] {
        return Some((Vector3::zeros(), values[0]));
    }

    let solution = mat.lu().solve(&rhs)?;
    if solution.iter().any(|c| !c.is_finite()) {
        return None;
    }
    Some((solution.fixed_rows::<3>(0).into_owned(), solution[3]))
}

/// Moments of the affine fits collected by one wedge for one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeQuadric<T: Real> {
    /// Sum of `w a a^T` with `a = [g; d]`
    pub a: Matrix4<T>,
    /// Sum of `w a`
    pub b: Vector4<T>,
    /// Sum of `w`
    pub w: T,
}

impl<T: Real> Default for AttributeQuadric<T> {
    fn default() -> Self {
        Self {
            a: Matrix4::zeros(),
            b: Vector4::zeros(),
            w: T::lit(0.0),
        }
    }
}

impl<T: Real> AttributeQuadric<T> {
    pub fn add_fit(&mut self, gradient: &Vector3<T>, offset: T, weight: T) {
        let a = Vector4::new(gradient.x, gradient.y, gradient.z, offset);
        self.a += a * a.transpose() * weight;
        self.b += a * weight;
        self.w += weight;
    }

    /// Position form left after choosing the best attribute value at every
    /// point: `A - b b^T / W`.
    pub fn reduced(&self) -> Matrix4<T> {
        if self.w <= T::lit(0.0) {
            return Matrix4::zeros();
        }
        self.a - self.b * self.b.transpose() / self.w
    }

    /// Attribute value minimizing the error at `p`.
    #[cfg(test)]
    pub fn optimal_value(&self, p: &Vector3<T>) -> Option<T> {
        if self.w <= T::lit(0.0) {
            return None;
        }
        Some(self.b.dot(&homogeneous(p)) / self.w)
    }
}

impl<T: Real> AddAssign<&AttributeQuadric<T>> for AttributeQuadric<T> {
    fn add_assign(&mut self, rhs: &AttributeQuadric<T>) {
        self.a += rhs.a;
        self.b += rhs.b;
        self.w += rhs.w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn test_plane_distance() {
        let q = Quadric::<f64>::from_plane(DVec3::Z, DVec3::new(0.0, 0.0, 1.0), 2.0);
        assert!((q.evaluate(&v(5.0, -3.0, 4.0)) - 18.0).abs() < 1e-12);
        assert_eq!(q.evaluate(&v(1.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_degenerate_plane_is_zero() {
        let q = Quadric::<f64>::from_plane(DVec3::ZERO, DVec3::ONE, 1.0);
        assert_eq!(q, Quadric::zero());
        let q = Quadric::<f64>::from_edge_constraint(DVec3::ZERO, DVec3::ZERO, DVec3::Z, 1.0);
        assert_eq!(q, Quadric::zero());
    }

    #[test]
    fn test_minimize_three_planes() {
        let corner = DVec3::new(1.0, 2.0, 3.0);
        let q = Quadric::<f64>::from_plane(DVec3::X, corner, 1.0)
            + Quadric::from_plane(DVec3::Y, corner, 1.0)
            + Quadric::from_plane(DVec3::Z, corner, 1.0);
        let x = minimize(&q.m, &v(0.0, 0.0, 0.0), 1e-3);
        assert!((x - v(1.0, 2.0, 3.0)).norm() < 1e-9);
        assert!(q.evaluate(&x).abs() < 1e-12);
    }

    #[test]
    fn test_minimize_singular_keeps_fallback_in_plane() {
        // Only the z = 0 plane: x and y stay at the fallback
        let q = Quadric::<f64>::from_plane(DVec3::Z, DVec3::ZERO, 1.0);
        let x = minimize(&q.m, &v(0.25, 0.75, 2.0), 1e-3);
        assert!((x - v(0.25, 0.75, 0.0)).norm() < 1e-12);

        let zero = Quadric::<f64>::zero();
        assert_eq!(minimize(&zero.m, &v(1.0, 1.0, 1.0), 1e-3), v(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_minimize_f32() {
        let q = Quadric::<f32>::from_plane(DVec3::X, DVec3::new(2.0, 0.0, 0.0), 1.0)
            + Quadric::from_plane(DVec3::Y, DVec3::ZERO, 1.0);
        let x = minimize(&q.m, &Vector3::new(0.0f32, 0.0, 0.5), 1e-3);
        assert!((x - Vector3::new(2.0f32, 0.0, 0.5)).norm() < 1e-5);
    }

    #[test]
    fn test_attribute_gradient_recovers_linear_field() {
        // value = 2x - y + 3 on the z = 0 plane
        let positions = [v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0)];
        let values = positions.map(|p| 2.0 * p.x - p.y + 3.0);
        let (g, d) = attribute_gradient(&positions, &v(0.0, 0.0, 1.0), values).unwrap();
        assert!((g - v(2.0, -1.0, 0.0)).norm() < 1e-12);
        assert!((d - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_attribute_gradient_rejects_sliver() {
        let positions = [v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(2.0, 0.0, 0.0)];
        assert!(attribute_gradient(&positions, &v(0.0, 0.0, 0.0), [0.0, 1.0, 2.0]).is_none());
    }

    #[test]
    fn test_attribute_quadric_reduction() {
        let mut q = AttributeQuadric::<f64>::default();
        // Two fits that agree: any point reproduces them exactly
        q.add_fit(&v(1.0, 0.0, 0.0), 0.5, 1.0);
        q.add_fit(&v(1.0, 0.0, 0.0), 0.5, 3.0);
        let p = v(2.0, 7.0, -1.0);
        let reduced = q.reduced();
        let h = Vector4::new(p.x, p.y, p.z, 1.0);
        assert!(h.dot(&(reduced * h)).abs() < 1e-9);
        assert!((q.optimal_value(&p).unwrap() - 2.5).abs() < 1e-12);

        // Disagreeing fits leave a positive residual
        q.add_fit(&v(0.0, 0.0, 0.0), 0.0, 1.0);
        assert!(h.dot(&(q.reduced() * h)) > 0.0);
        assert!(AttributeQuadric::<f64>::default().optimal_value(&p).is_none());
    }
}
