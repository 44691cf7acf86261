//! Dataset, feature and run-record persistence.
//!
//! # Responsibility
//! - Create and list line/polygon datasets in the working store.
//! - Persist contacts, boundaries and derived unit polygons.
//! - Record every pipeline run with its structured diagnostics.
//!
//! # Invariants
//! - Contact accuracy writes are checked against the stored accuracy domain.
//! - Polygon unit-code writes are checked against the bound unit-code field
//!   when one is supplied.
//! - Feature listing order is insertion order (`id ASC`).

use crate::join::inherit::JoinWarning;
use crate::model::domain::{attach, BoundField, ACCURACY_DOMAIN, ACCURACY_FIELD};
use crate::model::feature::{LineFeature, LineSet, UnitCode, UnitPolygon};
use crate::repo::codec::{decode_line, decode_polygon, encode_line, encode_polygon};
use crate::repo::unit_repo::load_domain;
use crate::repo::{in_transaction, RepoError, RepoResult};
use geo::Polygon;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Geometry type held by a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Line,
    Polygon,
}

impl DatasetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Polygon => "polygon",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "line" => Some(Self::Line),
            "polygon" => Some(Self::Polygon),
            _ => None,
        }
    }
}

/// Dataset catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub name: String,
    pub kind: DatasetKind,
    pub crs: Option<String>,
}

/// Polygon row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPolygon {
    pub id: i64,
    pub unit_code: Option<UnitCode>,
    pub geometry: Polygon<f64>,
}

/// One pipeline run to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub output_dataset: String,
    pub prior_dataset: Option<String>,
    pub tolerance: f64,
    pub polygon_count: usize,
    pub warnings: Vec<JoinWarning>,
}

/// Persisted run diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRunWarning {
    pub polygon_id: usize,
    pub kind: String,
    pub detail: String,
}

/// Repository interface for datasets and their features.
pub trait FeatureRepository {
    /// Runs `body` so that every store write it makes commits together or
    /// not at all. Repositories sharing this one's connection take part.
    fn atomically<T, E>(&self, body: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepoError>;

    fn create_dataset(&self, name: &str, kind: DatasetKind, crs: Option<&str>) -> RepoResult<()>;
    fn get_dataset(&self, name: &str) -> RepoResult<Option<Dataset>>;
    fn list_datasets(&self) -> RepoResult<Vec<Dataset>>;
    fn insert_lines(&self, dataset: &str, lines: &LineSet) -> RepoResult<Vec<i64>>;
    fn load_lines(&self, dataset: &str) -> RepoResult<LineSet>;
    fn replace_lines(&self, dataset: &str, lines: &LineSet) -> RepoResult<()>;
    fn insert_polygons(
        &self,
        dataset: &str,
        polygons: &[UnitPolygon],
        unit_codes: Option<&BoundField>,
    ) -> RepoResult<Vec<i64>>;
    fn load_polygons(&self, dataset: &str) -> RepoResult<Vec<StoredPolygon>>;
    fn record_run(&self, run: &RunRecord) -> RepoResult<()>;
    fn list_run_warnings(&self, run_id: Uuid) -> RepoResult<Vec<StoredRunWarning>>;
}

/// SQLite-backed feature repository.
pub struct SqliteFeatureRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFeatureRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn require_dataset(&self, name: &str, expected: DatasetKind) -> RepoResult<Dataset> {
        let dataset = self
            .get_dataset(name)?
            .ok_or_else(|| RepoError::DatasetNotFound(name.to_string()))?;
        if dataset.kind != expected {
            return Err(RepoError::WrongDatasetKind {
                name: name.to_string(),
                expected: expected.as_str(),
                actual: dataset.kind.as_str(),
            });
        }
        Ok(dataset)
    }

    fn accuracy_field(&self) -> RepoResult<BoundField> {
        let domain = load_domain(self.conn, ACCURACY_DOMAIN)?;
        Ok(attach(ACCURACY_FIELD, domain)?)
    }

    fn write_lines(&self, dataset: &str, lines: &LineSet) -> RepoResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(lines.len());
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO line_features (dataset, accuracy, geometry) VALUES (?1, ?2, ?3);",
        )?;
        for feature in lines.features() {
            let geometry = encode_line(&feature.geometry)
                .map_err(|err| RepoError::InvalidData(format!("line geometry: {err}")))?;
            stmt.execute(params![dataset, feature.accuracy, geometry])?;
            ids.push(self.conn.last_insert_rowid());
        }
        Ok(ids)
    }
}

impl FeatureRepository for SqliteFeatureRepository<'_> {
    fn atomically<T, E>(&self, body: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepoError>,
    {
        in_transaction(self.conn, body)
    }

    fn create_dataset(&self, name: &str, kind: DatasetKind, crs: Option<&str>) -> RepoResult<()> {
        if name.trim().is_empty() {
            return Err(RepoError::InvalidData(
                "dataset name must not be blank".to_string(),
            ));
        }
        if name.trim() != name {
            return Err(RepoError::InvalidData(format!(
                "dataset name `{name}` has leading or trailing whitespace"
            )));
        }
        if self.get_dataset(name)?.is_some() {
            return Err(RepoError::DatasetExists(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO datasets (name, kind, crs) VALUES (?1, ?2, ?3);",
            params![name, kind.as_str(), crs],
        )?;
        Ok(())
    }

    fn get_dataset(&self, name: &str) -> RepoResult<Option<Dataset>> {
        self.conn
            .query_row(
                "SELECT name, kind, crs FROM datasets WHERE name = ?1;",
                [name],
                |row| Ok(parse_dataset_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_datasets(&self) -> RepoResult<Vec<Dataset>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, kind, crs FROM datasets ORDER BY name ASC;")?;
        let mut rows = stmt.query([])?;
        let mut datasets = Vec::new();
        while let Some(row) = rows.next()? {
            datasets.push(parse_dataset_row(row)?);
        }
        Ok(datasets)
    }

    fn insert_lines(&self, dataset: &str, lines: &LineSet) -> RepoResult<Vec<i64>> {
        self.require_dataset(dataset, DatasetKind::Line)?;
        let accuracy = self.accuracy_field()?;
        for feature in lines.features() {
            accuracy.check_optional(feature.accuracy)?;
        }

        in_transaction(self.conn, || self.write_lines(dataset, lines))
    }

    fn load_lines(&self, dataset: &str) -> RepoResult<LineSet> {
        self.require_dataset(dataset, DatasetKind::Line)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, accuracy, geometry FROM line_features WHERE dataset = ?1 ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get("id")?;
            let text: String = row.get("geometry")?;
            let geometry = decode_line(&text).map_err(|err| {
                RepoError::InvalidData(format!("line_features.geometry of row {id}: {err}"))
            })?;
            features.push(LineFeature {
                source_id: Some(id),
                accuracy: row.get("accuracy")?,
                geometry,
            });
        }
        Ok(LineSet::new(features))
    }

    fn replace_lines(&self, dataset: &str, lines: &LineSet) -> RepoResult<()> {
        self.require_dataset(dataset, DatasetKind::Line)?;
        let accuracy = self.accuracy_field()?;
        for feature in lines.features() {
            accuracy.check_optional(feature.accuracy)?;
        }

        in_transaction(self.conn, || -> RepoResult<_> {
            self.conn
                .execute("DELETE FROM line_features WHERE dataset = ?1;", [dataset])?;
            self.write_lines(dataset, lines)?;
            Ok(())
        })
    }

    fn insert_polygons(
        &self,
        dataset: &str,
        polygons: &[UnitPolygon],
        unit_codes: Option<&BoundField>,
    ) -> RepoResult<Vec<i64>> {
        self.require_dataset(dataset, DatasetKind::Polygon)?;
        if let Some(field) = unit_codes {
            for polygon in polygons {
                field.check_optional(polygon.unit_code)?;
            }
        }

        in_transaction(self.conn, || -> RepoResult<_> {
            let mut ids = Vec::with_capacity(polygons.len());
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO polygon_features (dataset, unit_code, geometry) VALUES (?1, ?2, ?3);",
            )?;
            for polygon in polygons {
                let geometry = encode_polygon(&polygon.geometry)
                    .map_err(|err| RepoError::InvalidData(format!("polygon geometry: {err}")))?;
                stmt.execute(params![dataset, polygon.unit_code, geometry])?;
                ids.push(self.conn.last_insert_rowid());
            }
            Ok(ids)
        })
    }

    fn load_polygons(&self, dataset: &str) -> RepoResult<Vec<StoredPolygon>> {
        self.require_dataset(dataset, DatasetKind::Polygon)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, unit_code, geometry FROM polygon_features WHERE dataset = ?1 ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut polygons = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get("id")?;
            let text: String = row.get("geometry")?;
            let geometry = decode_polygon(&text).map_err(|err| {
                RepoError::InvalidData(format!("polygon_features.geometry of row {id}: {err}"))
            })?;
            polygons.push(StoredPolygon {
                id,
                unit_code: row.get("unit_code")?,
                geometry,
            });
        }
        Ok(polygons)
    }

    fn record_run(&self, run: &RunRecord) -> RepoResult<()> {
        in_transaction(self.conn, || -> RepoResult<_> {
            let run_id = run.run_id.to_string();
            self.conn.execute(
                "INSERT INTO runs (run_id, output_dataset, prior_dataset, tolerance, polygon_count)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    run_id,
                    run.output_dataset.as_str(),
                    run.prior_dataset.as_deref(),
                    run.tolerance,
                    run.polygon_count as i64,
                ],
            )?;
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO run_warnings (run_id, polygon_id, kind, detail) VALUES (?1, ?2, ?3, ?4);",
            )?;
            for warning in &run.warnings {
                stmt.execute(params![
                    run_id,
                    warning.polygon_id().0 as i64,
                    warning.kind(),
                    warning.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn list_run_warnings(&self, run_id: Uuid) -> RepoResult<Vec<StoredRunWarning>> {
        let mut stmt = self.conn.prepare(
            "SELECT polygon_id, kind, detail FROM run_warnings
             WHERE run_id = ?1
             ORDER BY rowid ASC;",
        )?;
        let mut rows = stmt.query([run_id.to_string()])?;
        let mut warnings = Vec::new();
        while let Some(row) = rows.next()? {
            let polygon_id: i64 = row.get("polygon_id")?;
            let polygon_id = usize::try_from(polygon_id).map_err(|_| {
                RepoError::InvalidData(format!("negative run_warnings.polygon_id `{polygon_id}`"))
            })?;
            warnings.push(StoredRunWarning {
                polygon_id,
                kind: row.get("kind")?,
                detail: row.get("detail")?,
            });
        }
        Ok(warnings)
    }
}

fn parse_dataset_row(row: &Row<'_>) -> RepoResult<Dataset> {
    let kind_text: String = row.get("kind")?;
    let kind = DatasetKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid dataset kind `{kind_text}` in datasets.kind"))
    })?;
    Ok(Dataset {
        name: row.get("name")?,
        kind,
        crs: row.get("crs")?,
    })
}
