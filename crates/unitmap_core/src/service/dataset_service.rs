//! Dataset interchange use cases.
//!
//! # Responsibility
//! - Load interchange files into store datasets, creating them on demand.
//! - Export store datasets back to the interchange form.
//!
//! # Invariants
//! - Appending to an existing dataset requires the same geometry kind.
//! - An import that fails writes nothing, not even the dataset entry.
//! - Imported unit codes are checked against the valid-units table
//!   whenever that table is non-empty.

use crate::model::domain::{attach, unit_code_domain, BoundField, UNIT_CODE_FIELD};
use crate::model::feature::{LineFeature, LineSet, PolygonId, UnitPolygon};
use crate::repo::codec::{DatasetFile, LineRecord, PolygonRecord};
use crate::repo::feature_repo::{DatasetKind, FeatureRepository};
use crate::repo::unit_repo::UnitRepository;
use crate::repo::{RepoError, RepoResult};
use log::info;

/// Counts for one import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub kind: DatasetKind,
    pub created: bool,
    pub features: usize,
}

pub struct DatasetService<F: FeatureRepository, U: UnitRepository> {
    features: F,
    units: U,
}

impl<F: FeatureRepository, U: UnitRepository> DatasetService<F, U> {
    pub fn new(features: F, units: U) -> Self {
        Self { features, units }
    }

    /// Writes `file` into dataset `name`.
    ///
    /// `default_crs` is recorded when the file carries none and the dataset
    /// is created here.
    pub fn import(
        &self,
        name: &str,
        file: &DatasetFile,
        default_crs: Option<&str>,
    ) -> RepoResult<ImportSummary> {
        let (kind, crs) = match file {
            DatasetFile::Line { crs, .. } => (DatasetKind::Line, crs.as_deref()),
            DatasetFile::Polygon { crs, .. } => (DatasetKind::Polygon, crs.as_deref()),
        };

        let (created, features) = self.features.atomically(|| -> RepoResult<_> {
            let created = match self.features.get_dataset(name)? {
                Some(existing) if existing.kind != kind => {
                    return Err(RepoError::WrongDatasetKind {
                        name: name.to_string(),
                        expected: existing.kind.as_str(),
                        actual: kind.as_str(),
                    })
                }
                Some(_) => false,
                None => {
                    self.features
                        .create_dataset(name, kind, crs.or(default_crs))?;
                    true
                }
            };
            Ok((created, self.write_features(name, file)?))
        })?;

        info!(
            "event=dataset_import module=service status=ok dataset={} kind={} created={} features={}",
            name,
            kind.as_str(),
            created,
            features
        );
        Ok(ImportSummary {
            kind,
            created,
            features,
        })
    }

    /// Reads dataset `name` into its interchange form.
    pub fn export(&self, name: &str) -> RepoResult<DatasetFile> {
        let dataset = self
            .features
            .get_dataset(name)?
            .ok_or_else(|| RepoError::DatasetNotFound(name.to_string()))?;
        Ok(match dataset.kind {
            DatasetKind::Line => DatasetFile::Line {
                crs: dataset.crs,
                features: self
                    .features
                    .load_lines(name)?
                    .features()
                    .iter()
                    .map(LineRecord::from)
                    .collect(),
            },
            DatasetKind::Polygon => DatasetFile::Polygon {
                crs: dataset.crs,
                features: self
                    .features
                    .load_polygons(name)?
                    .iter()
                    .map(|stored| PolygonRecord::new(&stored.geometry, stored.unit_code))
                    .collect(),
            },
        })
    }

    fn write_features(&self, name: &str, file: &DatasetFile) -> RepoResult<usize> {
        match file {
            DatasetFile::Line { features, .. } => {
                let lines: LineSet = features.iter().map(LineFeature::from).collect();
                Ok(self.features.insert_lines(name, &lines)?.len())
            }
            DatasetFile::Polygon { features, .. } => {
                let polygons: Vec<UnitPolygon> = features
                    .iter()
                    .enumerate()
                    .map(|(index, record)| UnitPolygon {
                        id: PolygonId(index),
                        geometry: record.to_polygon(),
                        unit_code: record.unit_code,
                    })
                    .collect();
                let unit_codes = self.unit_code_field()?;
                Ok(self
                    .features
                    .insert_polygons(name, &polygons, unit_codes.as_ref())?
                    .len())
            }
        }
    }

    fn unit_code_field(&self) -> RepoResult<Option<BoundField>> {
        let domain = unit_code_domain(&self.units.list_units()?)?;
        if domain.is_empty() {
            return Ok(None);
        }
        Ok(Some(attach(UNIT_CODE_FIELD, domain)?))
    }
}
