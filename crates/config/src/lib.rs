//! Shared configuration for polyreduce
//!
//! This crate provides the single source of truth for decimation tuning
//! (quadric weights, hardening, ring preference) and for the termination
//! targets of a reduction run. Everything here is plain serde data so a
//! run can be described in a settings file and replayed later.

use serde::{Deserialize, Serialize};

/// Weight of the virtual plane added along boundary edges
pub const DEFAULT_BOUNDARY_WEIGHT: f64 = 100.0;

/// Weight of the virtual plane added along crease edges
pub const DEFAULT_CREASE_WEIGHT: f64 = 10.0;

/// Weight of the virtual plane added along attribute seams
pub const DEFAULT_SEAM_WEIGHT: f64 = 10.0;

/// Cost added (per unit channel weight) when a collapse forces two
/// different attribute values at one point into a single wedge
pub const DEFAULT_WEDGE_CONFLICT_PENALTY: f64 = 1.0e3;

/// Below this ratio of smallest to largest eigenvalue the quadric is
/// treated as singular and solved with a pseudo-inverse
pub const DEFAULT_EIGENVALUE_RATIO: f64 = 1.0e-3;

/// Largest allowed rotation of a polygon normal caused by one collapse
pub const DEFAULT_MAX_NORMAL_DEVIATION_DEGREES: f64 = 90.0;

/// Ring priority multiplier (< 1.0 favours rings over single edges)
pub const DEFAULT_RING_PRIORITY_SCALE: f64 = 0.5;

/// Two attribute values closer than this are the same value
pub const DEFAULT_ATTRIBUTE_TOLERANCE: f64 = 1.0e-6;

/// Largest normal angle between two triangles merged by the dissolve pass
pub const DEFAULT_COPLANAR_TOLERANCE_DEGREES: f64 = 1.0;

/// Errors reported by `DecimateConfig::validate` and `ReduceTargets::validate`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },
    #[error("eigenvalue ratio must lie in [0, 1), got {0}")]
    EigenvalueRatio(f64),
    #[error("angle {name} must lie in [0, 180] degrees, got {value}")]
    InvalidAngle { name: &'static str, value: f64 },
    #[error("target ratio must lie in [0, 1], got {0}")]
    InvalidRatio(f64),
    #[error("error bounds are inverted: min {min} > max {max}")]
    InvertedErrorBounds { min: f64, max: f64 },
}

/// Weights of the synthetic quadrics and penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadricWeights {
    /// Boundary edges resist being pulled inward
    pub boundary_weight: f64,
    /// Explicit and detected crease edges
    pub crease_weight: f64,
    /// Edges where attribute values are discontinuous
    pub seam_weight: f64,
    /// Added per unit channel weight for each forced wedge merge
    pub wedge_conflict_penalty: f64,
}

impl Default for QuadricWeights {
    fn default() -> Self {
        Self {
            boundary_weight: DEFAULT_BOUNDARY_WEIGHT,
            crease_weight: DEFAULT_CREASE_WEIGHT,
            seam_weight: DEFAULT_SEAM_WEIGHT,
            wedge_conflict_penalty: DEFAULT_WEDGE_CONFLICT_PENALTY,
        }
    }
}

/// Where the surviving point of an edge collapse is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Minimize the quadric (falls back to the midpoint when singular)
    #[default]
    Optimal,
    /// Keep whichever endpoint is cheaper
    Endpoint,
}

/// Quad ring collapse settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Offer whole-ring collapses alongside single edges
    pub enabled: bool,
    /// Multiplier on a ring's mean rung cost when it is queued
    pub ring_priority_scale: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ring_priority_scale: DEFAULT_RING_PRIORITY_SCALE,
        }
    }
}

/// Tuning for one decimation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimateConfig {
    pub weights: QuadricWeights,
    pub eigenvalue_ratio: f64,
    pub max_normal_deviation_degrees: f64,
    /// Edges with a dihedral angle above this become creases (None disables)
    pub crease_angle_degrees: Option<f64>,
    /// Boundary points may not move or be removed
    pub harden_boundary: bool,
    /// Points on attribute seams may not move or be removed
    pub harden_seams: bool,
    pub placement: Placement,
    pub rings: RingConfig,
    /// After the collapse loop, merge coplanar triangle pairs into quads
    pub dissolve_coplanar: bool,
    pub coplanar_tolerance_degrees: f64,
    pub attribute_tolerance: f64,
}

impl Default for DecimateConfig {
    fn default() -> Self {
        Self {
            weights: QuadricWeights::default(),
            eigenvalue_ratio: DEFAULT_EIGENVALUE_RATIO,
            max_normal_deviation_degrees: DEFAULT_MAX_NORMAL_DEVIATION_DEGREES,
            crease_angle_degrees: None,
            harden_boundary: false,
            harden_seams: false,
            placement: Placement::default(),
            rings: RingConfig::default(),
            dissolve_coplanar: false,
            coplanar_tolerance_degrees: DEFAULT_COPLANAR_TOLERANCE_DEGREES,
            attribute_tolerance: DEFAULT_ATTRIBUTE_TOLERANCE,
        }
    }
}

fn check_weight(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeight { name, value })
    }
}

fn check_angle(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=180.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidAngle { name, value })
    }
}

impl DecimateConfig {
    /// Config with quad ring collapses enabled
    pub fn with_rings() -> Self {
        Self {
            rings: RingConfig {
                enabled: true,
                ..RingConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_weight("boundary_weight", self.weights.boundary_weight)?;
        check_weight("crease_weight", self.weights.crease_weight)?;
        check_weight("seam_weight", self.weights.seam_weight)?;
        check_weight("wedge_conflict_penalty", self.weights.wedge_conflict_penalty)?;
        check_weight("ring_priority_scale", self.rings.ring_priority_scale)?;
        check_weight("attribute_tolerance", self.attribute_tolerance)?;
        if !(0.0..1.0).contains(&self.eigenvalue_ratio) {
            return Err(ConfigError::EigenvalueRatio(self.eigenvalue_ratio));
        }
        check_angle("max_normal_deviation_degrees", self.max_normal_deviation_degrees)?;
        check_angle("coplanar_tolerance_degrees", self.coplanar_tolerance_degrees)?;
        if let Some(angle) = self.crease_angle_degrees {
            check_angle("crease_angle_degrees", angle)?;
        }
        Ok(())
    }
}

/// A requested element count, absolute or relative to the input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Count(usize),
    /// Fraction of the initial count, in [0, 1]
    Ratio(f64),
}

impl Target {
    /// Resolve against the element count the run started from
    pub fn resolve(self, initial: usize) -> usize {
        match self {
            Target::Count(count) => count,
            Target::Ratio(ratio) => (initial as f64 * ratio.clamp(0.0, 1.0)).round() as usize,
        }
    }
}

/// Termination parameters of one reduction request.
///
/// A run stops as soon as any given count target is reached, unless the
/// next collapse costs less than `min_error`. It also stops when the next
/// collapse would cost more than `max_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceTargets {
    pub target_polygons: Option<Target>,
    pub target_points: Option<Target>,
    /// Collapses cheaper than this run even past the count targets
    pub min_error: f64,
    /// No collapse above this cost is performed (None = unbounded)
    pub max_error: Option<f64>,
}

impl Default for ReduceTargets {
    fn default() -> Self {
        Self {
            target_polygons: None,
            target_points: None,
            min_error: 0.0,
            max_error: None,
        }
    }
}

impl ReduceTargets {
    pub fn polygons(count: usize) -> Self {
        Self {
            target_polygons: Some(Target::Count(count)),
            ..Self::default()
        }
    }

    pub fn points(count: usize) -> Self {
        Self {
            target_points: Some(Target::Count(count)),
            ..Self::default()
        }
    }

    pub fn polygon_ratio(ratio: f64) -> Self {
        Self {
            target_polygons: Some(Target::Ratio(ratio)),
            ..Self::default()
        }
    }

    /// Upper error bound, infinite when unset
    pub fn max_error_bound(&self) -> f64 {
        self.max_error.unwrap_or(f64::INFINITY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in [self.target_polygons, self.target_points].into_iter().flatten() {
            if let Target::Ratio(ratio) = target {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(ConfigError::InvalidRatio(ratio));
                }
            }
        }
        if self.min_error.is_nan() {
            return Err(ConfigError::InvalidWeight {
                name: "min_error",
                value: self.min_error,
            });
        }
        if let Some(max) = self.max_error {
            if max.is_nan() || self.min_error > max {
                return Err(ConfigError::InvertedErrorBounds {
                    min: self.min_error,
                    max,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DecimateConfig::default();
        assert_eq!(config.weights.boundary_weight, DEFAULT_BOUNDARY_WEIGHT);
        assert_eq!(config.eigenvalue_ratio, DEFAULT_EIGENVALUE_RATIO);
        assert!(!config.rings.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DecimateConfig =
            serde_json::from_str(r#"{ "harden_boundary": true, "rings": { "enabled": true } }"#)
                .unwrap();
        assert!(config.harden_boundary);
        assert!(config.rings.enabled);
        assert_eq!(config.rings.ring_priority_scale, DEFAULT_RING_PRIORITY_SCALE);
        assert_eq!(config.placement, Placement::Optimal);
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = DecimateConfig::default();
        config.weights.seam_weight = -1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidWeight {
                name: "seam_weight",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_target_resolve() {
        assert_eq!(Target::Count(7).resolve(100), 7);
        assert_eq!(Target::Ratio(0.5).resolve(101), 51);
        assert_eq!(Target::Ratio(0.0).resolve(10), 0);
    }

    #[test]
    fn test_targets_validate() {
        assert!(ReduceTargets::polygon_ratio(0.8).validate().is_ok());
        assert!(ReduceTargets::polygon_ratio(1.5).validate().is_err());

        let inverted = ReduceTargets {
            min_error: 2.0,
            max_error: Some(1.0),
            ..ReduceTargets::default()
        };
        assert!(inverted.validate().is_err());
        assert_eq!(ReduceTargets::default().max_error_bound(), f64::INFINITY);
    }
}
