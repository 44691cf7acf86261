//! Line and polygon feature records.
//!
//! # Responsibility
//! - Carry digitised contacts/boundary lines and derived unit polygons.
//! - Provide ordered, index-addressable collections so every algorithm can
//!   break ties by input order.
//!
//! # Invariants
//! - `LineSet` preserves input order; vertex references are
//!   `(feature_index, vertex_index)` into that order.
//! - `PolygonId` is stable only within one run.

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Integer identifier of a geological unit.
pub type UnitCode = i64;

/// Run-local polygon identity (index into a run's output order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolygonId(pub usize);

impl Display for PolygonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "polygon#{}", self.0)
    }
}

/// Address of one vertex inside a `LineSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexRef {
    pub feature: usize,
    pub vertex: usize,
}

/// One digitised polyline (a contact or a boundary ring).
#[derive(Debug, Clone, PartialEq)]
pub struct LineFeature {
    /// Store row id when loaded from a working store.
    pub source_id: Option<i64>,
    /// Accuracy code, constrained by the accuracy domain when persisted.
    pub accuracy: Option<i64>,
    pub geometry: LineString<f64>,
}

impl LineFeature {
    pub fn new(geometry: LineString<f64>) -> Self {
        Self {
            source_id: None,
            accuracy: None,
            geometry,
        }
    }

    /// Builds a feature from raw `(x, y)` pairs.
    pub fn from_xy(points: &[(f64, f64)]) -> Self {
        Self::new(LineString::from(points.to_vec()))
    }

    pub fn with_accuracy(mut self, accuracy: i64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Ordered collection of line features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSet {
    features: Vec<LineFeature>,
}

impl LineSet {
    pub fn new(features: Vec<LineFeature>) -> Self {
        Self { features }
    }

    /// Builds a line set holding the exterior ring of `polygon`.
    ///
    /// Map boundaries are digitised as polygons; the builder consumes their
    /// outline as a closed line.
    pub fn from_polygon_exterior(polygon: &Polygon<f64>) -> Self {
        Self::new(vec![LineFeature::new(polygon.exterior().clone())])
    }

    pub fn features(&self) -> &[LineFeature] {
        &self.features
    }

    pub fn into_features(self) -> Vec<LineFeature> {
        self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn vertex(&self, at: VertexRef) -> Option<Coord<f64>> {
        self.features
            .get(at.feature)
            .and_then(|feature| feature.geometry.0.get(at.vertex))
            .copied()
    }

    pub(crate) fn set_vertex(&mut self, at: VertexRef, coord: Coord<f64>) {
        if let Some(slot) = self
            .features
            .get_mut(at.feature)
            .and_then(|feature| feature.geometry.0.get_mut(at.vertex))
        {
            *slot = coord;
        }
    }

    /// Inserts `coord` before vertex `at`, shifting later vertices of that
    /// feature up by one. Out-of-range references are ignored.
    pub(crate) fn insert_vertex(&mut self, at: VertexRef, coord: Coord<f64>) {
        if let Some(feature) = self.features.get_mut(at.feature) {
            if at.vertex <= feature.geometry.0.len() {
                feature.geometry.0.insert(at.vertex, coord);
            }
        }
    }

    /// Iterates every vertex reference in input order.
    pub fn vertex_refs(&self) -> impl Iterator<Item = VertexRef> + '_ {
        self.features
            .iter()
            .enumerate()
            .flat_map(|(feature, line)| {
                (0..line.geometry.0.len()).map(move |vertex| VertexRef { feature, vertex })
            })
    }

    /// Iterates the first and last vertex of every feature with at least one
    /// vertex, in input order.
    pub fn endpoint_refs(&self) -> impl Iterator<Item = VertexRef> + '_ {
        self.features
            .iter()
            .enumerate()
            .flat_map(|(feature, line)| {
                let count = line.geometry.0.len();
                let mut refs = Vec::with_capacity(2);
                if count > 0 {
                    refs.push(VertexRef { feature, vertex: 0 });
                }
                if count > 1 {
                    refs.push(VertexRef {
                        feature,
                        vertex: count - 1,
                    });
                }
                refs
            })
    }
}

impl FromIterator<LineFeature> for LineSet {
    fn from_iter<T: IntoIterator<Item = LineFeature>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Derived polygon plus its optional inherited unit code.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPolygon {
    pub id: PolygonId,
    pub geometry: Polygon<f64>,
    pub unit_code: Option<UnitCode>,
}
