//! Core logic for deriving geological unit polygons from digitised contacts.
//! Every stage is usable in memory; `service` runs them against a working store.

pub mod config;
pub mod db;
pub mod join;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod topology;
pub mod versioning;

pub use config::{ConfigError, PipelineConfig, SnapConfig};
pub use db::{open_db, open_db_in_memory, open_workspace, DbError, WorkspaceContext};
pub use join::inherit::{inherit, JoinError, JoinOutcome, JoinWarning};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::domain::{attach, build_domain, BoundField, CategoricalDomain, DomainError, ValidUnit};
pub use model::feature::{LineFeature, LineSet, PolygonId, UnitCode, UnitPolygon};
pub use repo::codec::DatasetFile;
pub use repo::feature_repo::{DatasetKind, FeatureRepository, SqliteFeatureRepository};
pub use repo::unit_repo::{SqliteUnitRepository, UnitRepository};
pub use repo::{RepoError, RepoResult};
pub use service::dataset_service::{DatasetService, ImportSummary};
pub use service::pipeline_service::{
    derive_unit_polygons, PipelineError, PipelineReport, PipelineService,
};
pub use topology::polygonize::{build_faces, TopologyError};
pub use topology::snap::{snap, SnapError, SnapOptions, SnapReport};
pub use versioning::{next_available_name, next_name};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
