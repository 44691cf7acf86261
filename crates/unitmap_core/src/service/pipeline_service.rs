//! Unit-polygon derivation use case.
//!
//! # Responsibility
//! - Run Snap, Build and Join over datasets held in the working store.
//! - Name, persist and record the output of each run.
//!
//! # Invariants
//! - A run's store writes commit together; a failure at any stage leaves
//!   the store as it was.
//! - The output never overwrites an existing dataset; a free versioned name
//!   is chosen instead.
//! - Without a prior dataset every polygon is left unattributed and no
//!   join diagnostics are produced.

use crate::config::{ConfigError, PipelineConfig};
use crate::join::inherit::{inherit, validate_codes, JoinError, JoinOutcome, JoinWarning};
use crate::logging::{mark_stage, RunScope};
use crate::model::domain::{attach, unit_code_domain, BoundField, DomainError, UNIT_CODE_FIELD};
use crate::model::feature::{LineSet, PolygonId, UnitCode, UnitPolygon};
use crate::model::tolerance::{resolve_tolerance, ToleranceError};
use crate::repo::feature_repo::{DatasetKind, FeatureRepository, RunRecord};
use crate::repo::unit_repo::UnitRepository;
use crate::repo::RepoError;
use crate::topology::polygonize::{build_faces, TopologyError};
use crate::topology::snap::{snap_with_options, SnapError, SnapOptions, SnapReport};
use crate::versioning::next_available_name;
use geo::Polygon;
use log::{error, info};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tolerance(#[from] ToleranceError),

    #[error(transparent)]
    Snap(#[from] SnapError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl PipelineError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "invalid_config",
            Self::Tolerance(_) | Self::Snap(_) => "invalid_tolerance",
            Self::Topology(TopologyError::OpenContact { .. }) => "open_contact",
            Self::Topology(_) => "invalid_boundary",
            Self::Join(_) => "unknown_unit_code",
            Self::Domain(DomainError::DuplicateDomainCode { .. }) => "duplicate_domain_code",
            Self::Domain(_) => "domain_violation",
            Self::Repo(_) => "store_error",
        }
    }
}

/// In-memory result of Snap, Build and Join.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub snapped_contacts: LineSet,
    pub snap_report: SnapReport,
    pub polygons: Vec<UnitPolygon>,
    pub warnings: Vec<JoinWarning>,
}

/// Prior polygons with the field binding their codes must satisfy.
pub struct PriorUnits<'a> {
    pub polygons: &'a [(Polygon<f64>, UnitCode)],
    pub unit_codes: &'a BoundField,
}

/// Derives unit polygons without touching any store.
///
/// # Errors
/// - `Snap` for an invalid tolerance.
/// - `Topology` for an invalid boundary or a dangling contact.
/// - `Join` when an inherited code is missing from the unit-code domain.
pub fn derive_unit_polygons(
    contacts: &LineSet,
    boundary: &LineSet,
    tolerance: f64,
    options: &SnapOptions,
    prior: Option<PriorUnits<'_>>,
) -> PipelineResult<Derivation> {
    mark_stage("snap");
    let (snapped_contacts, snap_report) = snap_with_options(contacts, boundary, tolerance, options)?;
    mark_stage("polygonize");
    let faces = build_faces(&snapped_contacts, boundary)?;

    mark_stage("join");
    let outcome = match prior {
        Some(prior) => validate_codes(inherit(faces, prior.polygons), prior.unit_codes)?,
        None => unattributed(faces),
    };

    Ok(Derivation {
        snapped_contacts,
        snap_report,
        polygons: outcome.polygons,
        warnings: outcome.warnings,
    })
}

fn unattributed(faces: Vec<Polygon<f64>>) -> JoinOutcome {
    JoinOutcome {
        polygons: faces
            .into_iter()
            .enumerate()
            .map(|(index, geometry)| UnitPolygon {
                id: PolygonId(index),
                geometry,
                unit_code: None,
            })
            .collect(),
        warnings: Vec::new(),
    }
}

/// What one stored run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub output_dataset: String,
    pub prior_dataset: Option<String>,
    pub tolerance: f64,
    pub polygons: Vec<UnitPolygon>,
    pub warnings: Vec<JoinWarning>,
    pub snap: SnapReport,
}

/// Use-case service running the derivation against the working store.
pub struct PipelineService<F: FeatureRepository, U: UnitRepository> {
    features: F,
    units: U,
}

impl<F: FeatureRepository, U: UnitRepository> PipelineService<F, U> {
    pub fn new(features: F, units: U) -> Self {
        Self { features, units }
    }

    /// Runs one derivation and persists its output.
    ///
    /// # Side effects
    /// - Rewrites the stored unit-code domain from the valid-units table.
    /// - Creates the output polygon dataset and a run record.
    /// - Overwrites the contacts dataset when `write_snapped_contacts` is set.
    /// - The writes above commit together; a failed run leaves none of them.
    /// - Emits `pipeline_run` events with duration and status.
    pub fn run(&self, config: &PipelineConfig) -> PipelineResult<PipelineReport> {
        let started_at = Instant::now();
        let scope = RunScope::enter(Uuid::new_v4());
        info!(
            "event=pipeline_run module=service status=start run_id={} contacts={} boundary={} prior={}",
            scope.run_id(),
            config.contacts,
            config.boundary,
            config.prior.as_deref().unwrap_or("-")
        );

        match self.run_inner(config, scope.run_id()) {
            Ok(report) => {
                info!(
                    "event=pipeline_run module=service status=ok run_id={} output={} polygons={} warnings={} duration_ms={}",
                    report.run_id,
                    report.output_dataset,
                    report.polygons.len(),
                    report.warnings.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=pipeline_run module=service status=error run_id={} error_code={} duration_ms={} error={}",
                    scope.run_id(),
                    err.code(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn run_inner(&self, config: &PipelineConfig, run_id: Uuid) -> PipelineResult<PipelineReport> {
        config.validate()?;
        let tolerance = resolve_tolerance(config.tolerance, config.map_scale)?;

        mark_stage("load");
        let contacts = self.features.load_lines(&config.contacts)?;
        let boundary = self.load_boundary(&config.boundary)?;

        let domain = unit_code_domain(&self.units.list_units()?)?;

        let prior_polygons = match config.prior.as_deref() {
            Some(prior) => Some(self.load_prior(prior)?),
            None => None,
        };
        let unit_codes = if prior_polygons.is_some() {
            Some(attach(UNIT_CODE_FIELD, domain.clone())?)
        } else {
            None
        };
        let prior = prior_polygons
            .as_deref()
            .zip(unit_codes.as_ref())
            .map(|(polygons, unit_codes)| PriorUnits {
                polygons,
                unit_codes,
            });

        let derivation = derive_unit_polygons(
            &contacts,
            &boundary,
            tolerance,
            &SnapOptions::from(&config.snap),
            prior,
        )?;

        mark_stage("write");
        let output_dataset = self.features.atomically(|| -> PipelineResult<String> {
            self.units.replace_domain(&domain)?;
            let output_dataset = self.output_name(config)?;
            self.features
                .create_dataset(&output_dataset, DatasetKind::Polygon, config.crs.as_deref())?;
            self.features
                .insert_polygons(&output_dataset, &derivation.polygons, unit_codes.as_ref())?;

            if config.write_snapped_contacts {
                self.features
                    .replace_lines(&config.contacts, &derivation.snapped_contacts)?;
            }

            self.features.record_run(&RunRecord {
                run_id,
                output_dataset: output_dataset.clone(),
                prior_dataset: config.prior.clone(),
                tolerance,
                polygon_count: derivation.polygons.len(),
                warnings: derivation.warnings.clone(),
            })?;
            Ok(output_dataset)
        })?;

        Ok(PipelineReport {
            run_id,
            output_dataset,
            prior_dataset: config.prior.clone(),
            tolerance,
            polygons: derivation.polygons,
            warnings: derivation.warnings,
            snap: derivation.snap_report,
        })
    }

    /// Boundary rings from a line dataset, or exterior rings of a polygon
    /// dataset.
    fn load_boundary(&self, name: &str) -> PipelineResult<LineSet> {
        let dataset = self
            .features
            .get_dataset(name)?
            .ok_or_else(|| RepoError::DatasetNotFound(name.to_string()))?;
        match dataset.kind {
            DatasetKind::Line => Ok(self.features.load_lines(name)?),
            DatasetKind::Polygon => Ok(self
                .features
                .load_polygons(name)?
                .iter()
                .flat_map(|stored| LineSet::from_polygon_exterior(&stored.geometry).into_features())
                .collect()),
        }
    }

    /// Prior polygons that carry a code; uncoded ones cannot donate one.
    fn load_prior(&self, name: &str) -> PipelineResult<Vec<(Polygon<f64>, UnitCode)>> {
        Ok(self
            .features
            .load_polygons(name)?
            .into_iter()
            .filter_map(|stored| stored.unit_code.map(|code| (stored.geometry, code)))
            .collect())
    }

    fn output_name(&self, config: &PipelineConfig) -> PipelineResult<String> {
        let taken = |candidate: &str| {
            self.features
                .get_dataset(candidate)
                .map(|found| found.is_some())
        };

        let name = match config.prior.as_deref() {
            Some(prior) => next_available_name(prior, taken)?,
            None if !taken(&config.units)? => config.units.clone(),
            None => next_available_name(&config.units, taken)?,
        };
        Ok(name)
    }
}
