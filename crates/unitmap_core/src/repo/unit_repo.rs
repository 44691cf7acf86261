//! Valid-units table and stored categorical domains.
//!
//! # Responsibility
//! - Maintain the independently edited valid-units table.
//! - Persist and load named categorical domains.
//!
//! # Invariants
//! - `replace_domain` swaps all codes of one domain atomically.
//! - Duplicate unit codes stay in `valid_units`; they surface when the
//!   unit-code domain is rebuilt.

use crate::model::domain::{build_domain, CategoricalDomain, ValidUnit};
use crate::repo::{in_transaction, RepoError, RepoResult};
use rusqlite::{params, Connection};

/// Repository interface for valid units and domain codes.
pub trait UnitRepository {
    fn add_unit(&self, unit: &ValidUnit) -> RepoResult<()>;
    fn list_units(&self) -> RepoResult<Vec<ValidUnit>>;
    fn replace_domain(&self, domain: &CategoricalDomain) -> RepoResult<()>;
    fn load_domain(&self, name: &str) -> RepoResult<CategoricalDomain>;
}

/// SQLite-backed unit repository.
pub struct SqliteUnitRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUnitRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl UnitRepository for SqliteUnitRepository<'_> {
    fn add_unit(&self, unit: &ValidUnit) -> RepoResult<()> {
        let name = unit.unit_name.trim();
        if name.is_empty() {
            return Err(RepoError::InvalidData(format!(
                "unit {} needs a non-blank name",
                unit.unit_code
            )));
        }
        self.conn.execute(
            "INSERT INTO valid_units (unit_code, unit_name) VALUES (?1, ?2);",
            params![unit.unit_code, name],
        )?;
        Ok(())
    }

    fn list_units(&self) -> RepoResult<Vec<ValidUnit>> {
        let mut stmt = self
            .conn
            .prepare("SELECT unit_code, unit_name FROM valid_units ORDER BY rowid ASC;")?;
        let mut rows = stmt.query([])?;
        let mut units = Vec::new();
        while let Some(row) = rows.next()? {
            units.push(ValidUnit {
                unit_code: row.get("unit_code")?,
                unit_name: row.get("unit_name")?,
            });
        }
        Ok(units)
    }

    fn replace_domain(&self, domain: &CategoricalDomain) -> RepoResult<()> {
        in_transaction(self.conn, || -> RepoResult<_> {
            self.conn
                .execute("DELETE FROM domain_codes WHERE domain = ?1;", [domain.name()])?;
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO domain_codes (domain, code, label) VALUES (?1, ?2, ?3);",
            )?;
            for (code, label) in domain.entries() {
                stmt.execute(params![domain.name(), code, label])?;
            }
            Ok(())
        })
    }

    fn load_domain(&self, name: &str) -> RepoResult<CategoricalDomain> {
        load_domain(self.conn, name)
    }
}

/// Reads domain `name`; an unknown name yields an empty domain.
pub(crate) fn load_domain(conn: &Connection, name: &str) -> RepoResult<CategoricalDomain> {
    let mut stmt =
        conn.prepare("SELECT code, label FROM domain_codes WHERE domain = ?1 ORDER BY code ASC;")?;
    let mut rows = stmt.query([name])?;
    let mut entries: Vec<(i64, String)> = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push((row.get("code")?, row.get("label")?));
    }
    Ok(build_domain(name, entries)?)
}
