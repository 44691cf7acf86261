//! Spatial attribute join between polygon generations.
//!
//! # Responsibility
//! - Carry unit codes from the previous digitising pass onto freshly
//!   derived polygons by point-in-polygon containment.
//!
//! # See also
//! - `crate::model::domain` for the unit-code field binding.

pub mod inherit;
