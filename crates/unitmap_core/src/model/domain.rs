//! Categorical domains (valid code/label pairs) and field bindings.
//!
//! # Responsibility
//! - Build validated code -> label domains from tabular rows.
//! - Bind a domain to an attribute field and check writes against it.
//!
//! # Invariants
//! - Codes are unique within a domain; duplicates fail at build time.
//! - A bound field never accepts a code absent from its domain.
//! - An empty domain cannot be bound.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Domain name for contact accuracy.
pub const ACCURACY_DOMAIN: &str = "accuracy";
/// Domain name for geological unit codes.
pub const UNIT_CODE_DOMAIN: &str = "unit_code";
/// Field name carrying contact accuracy.
pub const ACCURACY_FIELD: &str = "Accuracy";
/// Field name carrying the unit code on polygons.
pub const UNIT_CODE_FIELD: &str = "Unit_code";

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain `{domain}` lists code {code} more than once")]
    DuplicateDomainCode { domain: String, code: i64 },

    #[error("domain `{domain}` has no codes and cannot be attached to `{field}`")]
    EmptyDomain { domain: String, field: String },

    #[error("code {code} is not in domain `{domain}` bound to field `{field}`")]
    CodeNotInDomain {
        field: String,
        domain: String,
        code: i64,
    },
}

/// Ordered code -> label mapping constraining one attribute field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalDomain {
    name: String,
    entries: BTreeMap<i64, String>,
}

impl CategoricalDomain {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, code: i64) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn label(&self, code: i64) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending code order.
    pub fn entries(&self) -> impl Iterator<Item = (i64, &str)> {
        self.entries
            .iter()
            .map(|(code, label)| (*code, label.as_str()))
    }
}

/// Builds a domain from `(code, label)` rows.
///
/// # Errors
/// - `DuplicateDomainCode` when a code appears in more than one row; the
///   first repeated code in row order is reported.
pub fn build_domain<I, L>(name: impl Into<String>, rows: I) -> DomainResult<CategoricalDomain>
where
    I: IntoIterator<Item = (i64, L)>,
    L: Into<String>,
{
    let name = name.into();
    let mut entries = BTreeMap::new();
    for (code, label) in rows {
        if entries.insert(code, label.into()).is_some() {
            return Err(DomainError::DuplicateDomainCode { domain: name, code });
        }
    }
    Ok(CategoricalDomain { name, entries })
}

/// One row of the valid-units lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidUnit {
    pub unit_code: i64,
    pub unit_name: String,
}

/// Rebuilds the unit-code domain from valid-units rows.
pub fn unit_code_domain(units: &[ValidUnit]) -> DomainResult<CategoricalDomain> {
    build_domain(
        UNIT_CODE_DOMAIN,
        units
            .iter()
            .map(|unit| (unit.unit_code, unit.unit_name.as_str())),
    )
}

/// The fixed accuracy domain carried by every contact dataset.
pub fn accuracy_domain() -> CategoricalDomain {
    CategoricalDomain {
        name: ACCURACY_DOMAIN.to_string(),
        entries: BTreeMap::from([
            (1, "Accurate".to_string()),
            (2, "Approximate".to_string()),
            (3, "Inferred".to_string()),
        ]),
    }
}

/// A field name bound to a non-empty domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundField {
    field: String,
    domain: CategoricalDomain,
}

impl BoundField {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn domain(&self) -> &CategoricalDomain {
        &self.domain
    }

    /// Checks one write of the bound field.
    pub fn check(&self, code: i64) -> DomainResult<()> {
        if self.domain.contains(code) {
            return Ok(());
        }
        Err(DomainError::CodeNotInDomain {
            field: self.field.clone(),
            domain: self.domain.name.clone(),
            code,
        })
    }

    /// Checks an optional write; `None` (null) is always accepted.
    pub fn check_optional(&self, code: Option<i64>) -> DomainResult<()> {
        code.map_or(Ok(()), |code| self.check(code))
    }
}

/// Binds `domain` to `field`.
///
/// # Errors
/// - `EmptyDomain` when the domain has no codes, since no write could ever
///   satisfy it.
pub fn attach(field: impl Into<String>, domain: CategoricalDomain) -> DomainResult<BoundField> {
    let field = field.into();
    if domain.is_empty() {
        return Err(DomainError::EmptyDomain {
            domain: domain.name,
            field,
        });
    }
    Ok(BoundField { field, domain })
}
