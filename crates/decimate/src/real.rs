//! Floating point width used for quadric accumulation.

use nalgebra::RealField;

/// Scalar the quadric engine accumulates in.
///
/// Mesh positions and attribute values are stored as `f64`; quadrics,
/// their minimizers and the attribute fits run in `Self`.
pub trait Real: RealField + Copy {
    fn lit(value: f64) -> Self;
    fn into_f64(self) -> f64;
}

impl Real for f32 {
    fn lit(value: f64) -> Self {
        value as f32
    }

    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    fn lit(value: f64) -> Self {
        value
    }

    fn into_f64(self) -> f64 {
        self
    }
}
