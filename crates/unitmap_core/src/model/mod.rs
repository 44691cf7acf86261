//! Domain model for digitised geology.
//!
//! # Responsibility
//! - Define the line, polygon and attribute shapes shared by every stage.
//! - Keep categorical-domain and tolerance invariants close to their data.
//!
//! # Invariants
//! - Geometry lives in one externally fixed planar coordinate system.
//! - A `unit_code` is set at most once per polygon, by the attribute join.

pub mod domain;
pub mod feature;
pub mod tolerance;
