//! Repository layer over the working store.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for datasets, valid
//!   units, categorical domains and run records.
//! - Keep SQL and geometry encoding out of the pipeline service.
//!
//! # Invariants
//! - Writes of domain-bound fields are checked before any SQL mutation.
//! - Reads reject malformed persisted rows instead of masking them.
//! - Multi-statement writes join the caller's open transaction, so a
//!   use case can make several repository writes all-or-nothing.

pub mod codec;
pub mod feature_repo;
pub mod unit_repo;

use crate::db::DbError;
use crate::model::domain::DomainError;
use rusqlite::Connection;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by every store-backed repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    #[error("dataset `{name}` holds {actual} features, expected {expected}")]
    WrongDatasetKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Runs `body` in a new transaction, or inside the one already open on
/// `conn`. An error leaves the outermost transaction to roll back.
pub(crate) fn in_transaction<T, E>(
    conn: &Connection,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<RepoError>,
{
    if !conn.is_autocommit() {
        return body();
    }
    let tx = conn.unchecked_transaction().map_err(RepoError::from)?;
    let value = body()?;
    tx.commit().map_err(RepoError::from)?;
    Ok(value)
}
