//! Digitising tolerance resolution.
//!
//! A tolerance is the maximum distance at which two vertices count as the
//! same point. It is either given explicitly or derived from the field map
//! scale using a fixed drafting accuracy.

use thiserror::Error;

/// Drafting accuracy on paper, in metres (0.5 mm).
pub const DRAFTING_ACCURACY_M: f64 = 0.0005;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToleranceError {
    #[error("tolerance must be a positive finite number, got {0}")]
    InvalidTolerance(f64),

    #[error("map scale must be a positive finite number, got {0}")]
    InvalidMapScale(f64),

    #[error("no tolerance or map scale was provided")]
    Missing,
}

/// Validates an explicit tolerance.
pub fn validate_tolerance(value: f64) -> Result<f64, ToleranceError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ToleranceError::InvalidTolerance(value))
    }
}

/// Ground distance matching the drafting accuracy at map scale `1:scale`.
pub fn tolerance_from_map_scale(scale: f64) -> Result<f64, ToleranceError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ToleranceError::InvalidMapScale(scale));
    }
    validate_tolerance(scale * DRAFTING_ACCURACY_M)
}

/// Resolves the run tolerance; an explicit value overrides the map scale.
pub fn resolve_tolerance(
    explicit: Option<f64>,
    map_scale: Option<f64>,
) -> Result<f64, ToleranceError> {
    match (explicit, map_scale) {
        (Some(value), _) => validate_tolerance(value),
        (None, Some(scale)) => tolerance_from_map_scale(scale),
        (None, None) => Err(ToleranceError::Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_tolerance, ToleranceError};

    #[test]
    fn explicit_tolerance_overrides_map_scale() {
        assert_eq!(resolve_tolerance(Some(0.25), Some(50_000.0)), Ok(0.25));
    }

    #[test]
    fn map_scale_uses_half_millimetre_drafting_accuracy() {
        let tolerance = resolve_tolerance(None, Some(10_000.0)).unwrap();
        assert!((tolerance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_values() {
        assert_eq!(
            resolve_tolerance(Some(0.0), None),
            Err(ToleranceError::InvalidTolerance(0.0))
        );
        assert!(matches!(
            resolve_tolerance(None, Some(-1.0)),
            Err(ToleranceError::InvalidMapScale(_))
        ));
        assert_eq!(resolve_tolerance(None, None), Err(ToleranceError::Missing));
    }
}
