//! JSON geometry encoding shared by the store and dataset files.

use crate::model::feature::{LineFeature, UnitCode};
use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Serialized line feature: accuracy plus `[x, y]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<i64>,
    pub coordinates: Vec<[f64; 2]>,
}

/// Serialized polygon feature with optional unit code and holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<UnitCode>,
    pub exterior: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interiors: Vec<Vec<[f64; 2]>>,
}

/// Interchange file holding one dataset, tagged by geometry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetFile {
    Line {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<String>,
        features: Vec<LineRecord>,
    },
    Polygon {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crs: Option<String>,
        features: Vec<PolygonRecord>,
    },
}

#[derive(Serialize, Deserialize)]
struct StoredRings {
    exterior: Vec<[f64; 2]>,
    #[serde(default)]
    interiors: Vec<Vec<[f64; 2]>>,
}

pub fn ring_to_pairs(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.0.iter().map(|coord| [coord.x, coord.y]).collect()
}

pub fn pairs_to_ring(pairs: &[[f64; 2]]) -> LineString<f64> {
    LineString::new(
        pairs
            .iter()
            .map(|[x, y]| Coord { x: *x, y: *y })
            .collect(),
    )
}

impl From<&LineFeature> for LineRecord {
    fn from(feature: &LineFeature) -> Self {
        Self {
            accuracy: feature.accuracy,
            coordinates: ring_to_pairs(&feature.geometry),
        }
    }
}

impl From<&LineRecord> for LineFeature {
    fn from(record: &LineRecord) -> Self {
        LineFeature {
            source_id: None,
            accuracy: record.accuracy,
            geometry: pairs_to_ring(&record.coordinates),
        }
    }
}

impl PolygonRecord {
    pub fn new(geometry: &Polygon<f64>, unit_code: Option<UnitCode>) -> Self {
        Self {
            unit_code,
            exterior: ring_to_pairs(geometry.exterior()),
            interiors: geometry.interiors().iter().map(ring_to_pairs).collect(),
        }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            pairs_to_ring(&self.exterior),
            self.interiors.iter().map(|ring| pairs_to_ring(ring)).collect(),
        )
    }
}

pub(crate) fn encode_line(geometry: &LineString<f64>) -> serde_json::Result<String> {
    serde_json::to_string(&ring_to_pairs(geometry))
}

pub(crate) fn decode_line(text: &str) -> serde_json::Result<LineString<f64>> {
    let pairs: Vec<[f64; 2]> = serde_json::from_str(text)?;
    Ok(pairs_to_ring(&pairs))
}

pub(crate) fn encode_polygon(geometry: &Polygon<f64>) -> serde_json::Result<String> {
    serde_json::to_string(&StoredRings {
        exterior: ring_to_pairs(geometry.exterior()),
        interiors: geometry.interiors().iter().map(ring_to_pairs).collect(),
    })
}

pub(crate) fn decode_polygon(text: &str) -> serde_json::Result<Polygon<f64>> {
    let rings: StoredRings = serde_json::from_str(text)?;
    Ok(Polygon::new(
        pairs_to_ring(&rings.exterior),
        rings
            .interiors
            .iter()
            .map(|ring| pairs_to_ring(ring))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::{decode_polygon, encode_polygon, DatasetFile, LineRecord, PolygonRecord};
    use geo::{polygon, Area};

    #[test]
    fn polygon_with_hole_survives_storage_encoding() {
        let geometry = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 3.0), (x: 0.0, y: 3.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 1.0, y: 2.0), (x: 2.0, y: 2.0), (x: 2.0, y: 1.0)]],
        );
        let decoded = decode_polygon(&encode_polygon(&geometry).unwrap()).unwrap();
        assert_eq!(decoded, geometry);
        assert!((decoded.unsigned_area() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn polygon_record_omits_empty_fields() {
        let geometry = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 1.0)];
        let json = serde_json::to_string(&PolygonRecord::new(&geometry, None)).unwrap();
        assert!(!json.contains("unit_code"));
        assert!(!json.contains("interiors"));
    }

    #[test]
    fn dataset_file_is_tagged_by_kind() {
        let file: DatasetFile = serde_json::from_str(
            r#"{"kind":"line","features":[{"accuracy":2,"coordinates":[[0,0],[1,1]]}]}"#,
        )
        .unwrap();
        assert_eq!(
            file,
            DatasetFile::Line {
                crs: None,
                features: vec![LineRecord {
                    accuracy: Some(2),
                    coordinates: vec![[0.0, 0.0], [1.0, 1.0]],
                }],
            }
        );
        assert!(serde_json::from_str::<DatasetFile>(r#"{"kind":"point","features":[]}"#).is_err());
    }
}
