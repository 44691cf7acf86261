//! Unit-code inheritance from a prior polygon layer.
//!
//! # Responsibility
//! - Give each new polygon the code of the prior polygon strictly
//!   containing its representative interior point.
//! - Collect recoverable diagnostics instead of failing the run.
//! - Check every inherited code against the unit-code domain.
//!
//! # Invariants
//! - Boundary touches never count as containment.
//! - With several containing priors the first in input order wins.
//! - Unknown codes fail only after every polygon has been attributed.

use crate::model::domain::BoundField;
use crate::model::feature::{PolygonId, UnitCode, UnitPolygon};
use geo::{Contains, InteriorPoint, Polygon};
use log::{error, info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type JoinResult<T> = Result<T, JoinError>;

/// Recoverable per-polygon diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JoinWarning {
    /// No prior polygon contains the representative point.
    Unattributed { polygon_id: PolygonId },
    /// More than one prior polygon contains the representative point.
    Ambiguous {
        polygon_id: PolygonId,
        chosen: UnitCode,
        candidates: Vec<UnitCode>,
    },
}

impl JoinWarning {
    pub fn polygon_id(&self) -> PolygonId {
        match self {
            Self::Unattributed { polygon_id } | Self::Ambiguous { polygon_id, .. } => *polygon_id,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unattributed { .. } => "unattributed",
            Self::Ambiguous { .. } => "ambiguous",
        }
    }
}

impl Display for JoinWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unattributed { polygon_id } => {
                write!(f, "{polygon_id} is not inside any prior unit polygon")
            }
            Self::Ambiguous {
                polygon_id,
                chosen,
                candidates,
            } => write!(
                f,
                "{polygon_id} is inside several prior unit polygons {candidates:?}; kept {chosen}"
            ),
        }
    }
}

/// Inherited code that the unit-code domain does not list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnknownUnitCode {
    pub code: UnitCode,
    pub polygon_id: PolygonId,
}

/// Best-effort attribution plus its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub polygons: Vec<UnitPolygon>,
    pub warnings: Vec<JoinWarning>,
}

impl JoinOutcome {
    pub fn unattributed(&self) -> impl Iterator<Item = PolygonId> + '_ {
        self.warnings.iter().filter_map(|warning| match warning {
            JoinWarning::Unattributed { polygon_id } => Some(*polygon_id),
            JoinWarning::Ambiguous { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    #[error("inherited unit codes are missing from the valid units table: {}", describe(.violations))]
    UnknownUnitCodes {
        violations: Vec<UnknownUnitCode>,
        /// The complete attribution attempt, for reporting.
        attempt: Box<JoinOutcome>,
    },
}

fn describe(violations: &[UnknownUnitCode]) -> String {
    violations
        .iter()
        .map(|violation| format!("{} on {}", violation.code, violation.polygon_id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Assigns unit codes to `new_polygons` from `prior_polygons`.
///
/// Polygon ids are the positions in `new_polygons`. The result keeps that
/// order.
pub fn inherit(
    new_polygons: Vec<Polygon<f64>>,
    prior_polygons: &[(Polygon<f64>, UnitCode)],
) -> JoinOutcome {
    let mut polygons = Vec::with_capacity(new_polygons.len());
    let mut warnings = Vec::new();

    for (index, geometry) in new_polygons.into_iter().enumerate() {
        let id = PolygonId(index);
        let candidates: Vec<UnitCode> = match geometry.interior_point() {
            Some(label_point) => prior_polygons
                .iter()
                .filter(|(prior, _)| prior.contains(&label_point))
                .map(|(_, code)| *code)
                .collect(),
            None => Vec::new(),
        };

        let unit_code = match candidates.as_slice() {
            [] => {
                warnings.push(JoinWarning::Unattributed { polygon_id: id });
                None
            }
            [only] => Some(*only),
            [first, ..] => {
                warnings.push(JoinWarning::Ambiguous {
                    polygon_id: id,
                    chosen: *first,
                    candidates: candidates.clone(),
                });
                Some(*first)
            }
        };

        polygons.push(UnitPolygon {
            id,
            geometry,
            unit_code,
        });
    }

    for warning in &warnings {
        warn!(
            "event=inherit module=join status=warning kind={} polygon={}",
            warning.kind(),
            warning.polygon_id()
        );
    }
    info!(
        "event=inherit module=join status=ok polygons={} priors={} warnings={}",
        polygons.len(),
        prior_polygons.len(),
        warnings.len()
    );

    JoinOutcome { polygons, warnings }
}

/// Checks every assigned code against the unit-code field binding.
///
/// # Errors
/// - `UnknownUnitCodes` listing every offending polygon, with the full
///   outcome attached.
pub fn validate_codes(outcome: JoinOutcome, unit_codes: &BoundField) -> JoinResult<JoinOutcome> {
    let violations: Vec<UnknownUnitCode> = outcome
        .polygons
        .iter()
        .filter_map(|polygon| {
            let code = polygon.unit_code?;
            unit_codes.check(code).err().map(|_| UnknownUnitCode {
                code,
                polygon_id: polygon.id,
            })
        })
        .collect();

    if violations.is_empty() {
        return Ok(outcome);
    }

    error!(
        "event=inherit module=join status=error error_code=unknown_unit_code count={}",
        violations.len()
    );
    Err(JoinError::UnknownUnitCodes {
        violations,
        attempt: Box::new(outcome),
    })
}

/// `inherit` followed by `validate_codes`.
pub fn inherit_checked(
    new_polygons: Vec<Polygon<f64>>,
    prior_polygons: &[(Polygon<f64>, UnitCode)],
    unit_codes: &BoundField,
) -> JoinResult<JoinOutcome> {
    validate_codes(inherit(new_polygons, prior_polygons), unit_codes)
}
