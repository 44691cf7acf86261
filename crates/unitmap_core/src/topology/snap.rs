//! Tolerance-based vertex snapping of a contact network.
//!
//! # Responsibility
//! - Merge contact endpoints that lie within tolerance of each other.
//! - Project contact vertices onto nearby boundary edges, then onto nearby
//!   edges of other contacts.
//!
//! # Invariants
//! - Rule order per pass is fixed: END merge, boundary EDGE, contact EDGE.
//! - Vertices that share a location move together, so a merge made by an
//!   earlier rule is never split by a later one.
//! - Passes repeat until one moves nothing, so snapping an already snapped
//!   network with the same tolerance is a no-op.
//!
//! # Tie-breaking
//! - END: among anchors within tolerance the nearest wins; equally near
//!   anchors resolve to the one created first (lowest vertex reference).
//! - EDGE: equally near edges resolve to the lowest `(feature, segment)`.
//!   Against contacts, a vertex within tolerance wins over any edge point and
//!   equally near vertices resolve to the lowest vertex reference.
//! - With `boundary_priority`, a vertex lying on the boundary is never
//!   pulled onto a contact edge.

use crate::model::feature::{LineSet, VertexRef};
use crate::topology::{coordinate_scale, project_onto};
use geo::{Coord, Line};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub type SnapResult<T> = Result<T, SnapError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapError {
    #[error("snap tolerance must be a positive finite number, got {0}")]
    InvalidTolerance(f64),
}

/// Tunables for the snapping passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapOptions {
    /// Keep vertices already on the boundary off contact edges.
    pub boundary_priority: bool,
    /// Upper bound on END/EDGE/EDGE passes.
    pub max_passes: usize,
}

impl Default for SnapOptions {
    fn default() -> Self {
        Self {
            boundary_priority: true,
            max_passes: 16,
        }
    }
}

/// Counters describing one snapping run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapReport {
    pub merged_endpoints: usize,
    pub boundary_snaps: usize,
    pub contact_snaps: usize,
    pub passes: usize,
    pub converged: bool,
}

impl SnapReport {
    pub fn total_moves(&self) -> usize {
        self.merged_endpoints + self.boundary_snaps + self.contact_snaps
    }
}

/// Snaps `contacts` against themselves and `boundary` with default options.
pub fn snap(contacts: &LineSet, boundary: &LineSet, tolerance: f64) -> SnapResult<LineSet> {
    snap_with_options(contacts, boundary, tolerance, &SnapOptions::default())
        .map(|(snapped, _)| snapped)
}

/// Snaps `contacts` and reports what moved.
///
/// # Errors
/// - `InvalidTolerance` when `tolerance` is not a positive finite number.
pub fn snap_with_options(
    contacts: &LineSet,
    boundary: &LineSet,
    tolerance: f64,
    options: &SnapOptions,
) -> SnapResult<(LineSet, SnapReport)> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(SnapError::InvalidTolerance(tolerance));
    }

    let snapper = Snapper::new(contacts, boundary, tolerance, options);
    let mut snapped = contacts.clone();
    let mut report = SnapReport::default();

    while report.passes < options.max_passes.max(1) {
        report.passes += 1;
        let merged = snapper.merge_endpoints(&mut snapped);
        let to_boundary = snapper.snap_to_boundary(&mut snapped);
        let to_contacts = snapper.snap_to_contacts(&mut snapped);
        report.merged_endpoints += merged;
        report.boundary_snaps += to_boundary;
        report.contact_snaps += to_contacts;

        if merged + to_boundary + to_contacts == 0 {
            report.converged = true;
            break;
        }
    }

    if report.converged {
        info!(
            "event=snap module=topology status=ok tolerance={} passes={} merged={} boundary_snaps={} contact_snaps={}",
            tolerance,
            report.passes,
            report.merged_endpoints,
            report.boundary_snaps,
            report.contact_snaps
        );
    } else {
        warn!(
            "event=snap module=topology status=not_converged tolerance={} passes={}",
            tolerance, report.passes
        );
    }

    Ok((snapped, report))
}

struct Snapper {
    boundary_edges: Vec<Line<f64>>,
    tolerance: f64,
    eps: f64,
    options: SnapOptions,
}

impl Snapper {
    fn new(contacts: &LineSet, boundary: &LineSet, tolerance: f64, options: &SnapOptions) -> Self {
        let boundary_edges: Vec<Line<f64>> = boundary
            .features()
            .iter()
            .flat_map(|feature| feature.geometry.lines())
            .collect();
        let scale = coordinate_scale(
            contacts
                .features()
                .iter()
                .chain(boundary.features())
                .flat_map(|feature| feature.geometry.0.iter()),
        );
        Self {
            boundary_edges,
            tolerance,
            // Below this distance a vertex already sits on its target.
            eps: (tolerance * 1e-6).max(scale * 1e-12),
            options: *options,
        }
    }

    /// END rule: pulls every endpoint onto the first anchor within tolerance.
    fn merge_endpoints(&self, lines: &mut LineSet) -> usize {
        let refs: Vec<VertexRef> = lines.endpoint_refs().collect();
        let mut anchors: Vec<Coord<f64>> = Vec::new();
        let mut moved = 0;

        for at in refs {
            let Some(coord) = lines.vertex(at) else {
                continue;
            };
            match self.nearest_anchor(&anchors, coord) {
                Some(anchor) if anchor != coord => {
                    lines.set_vertex(at, anchor);
                    moved += 1;
                }
                Some(_) => {}
                None => anchors.push(coord),
            }
        }

        moved
    }

    fn nearest_anchor(&self, anchors: &[Coord<f64>], coord: Coord<f64>) -> Option<Coord<f64>> {
        let mut best: Option<(f64, Coord<f64>)> = None;
        for anchor in anchors {
            let delta = *anchor - coord;
            let distance = delta.x.hypot(delta.y);
            if distance > self.tolerance {
                continue;
            }
            match best {
                Some((best_distance, _)) if distance >= best_distance - self.eps => {}
                _ => best = Some((distance, *anchor)),
            }
        }
        best.map(|(_, anchor)| anchor)
    }

    /// Boundary EDGE rule.
    fn snap_to_boundary(&self, lines: &mut LineSet) -> usize {
        let mut moved = 0;
        for group in coincident_groups(lines) {
            let Some(coord) = lines.vertex(group[0]) else {
                continue;
            };
            let Some((distance, target)) = nearest_edge(self.boundary_edges.iter(), coord, self.eps)
            else {
                continue;
            };
            if distance > self.eps && distance <= self.tolerance {
                move_group(lines, &group, target);
                moved += 1;
            }
        }
        moved
    }

    /// Contact EDGE rule, against contacts not sharing the vertex.
    ///
    /// A vertex of another contact within tolerance is preferred over a
    /// point inside one of its edges. An edge projection is inserted into the
    /// target contact so both lines share the new vertex and later passes
    /// treat them as one location.
    fn snap_to_contacts(&self, lines: &mut LineSet) -> usize {
        let locations: Vec<Coord<f64>> = coincident_groups(lines)
            .iter()
            .filter_map(|group| lines.vertex(group[0]))
            .collect();

        let mut moved = 0;
        for location in locations {
            // Insertions shift vertex indices, so refs are looked up afresh.
            let group = refs_at(lines, location);
            if group.is_empty() {
                continue;
            }
            if self.options.boundary_priority && self.on_boundary(location) {
                continue;
            }

            let own: BTreeSet<usize> = group.iter().map(|at| at.feature).collect();
            match self.contact_target(lines, &own, location) {
                Some(ContactTarget::Vertex(target)) => {
                    move_group(lines, &group, target);
                    moved += 1;
                }
                Some(ContactTarget::Edge { at, target }) => {
                    move_group(lines, &group, target);
                    lines.insert_vertex(at, target);
                    moved += 1;
                }
                None => {}
            }
        }
        moved
    }

    fn contact_target(
        &self,
        lines: &LineSet,
        own: &BTreeSet<usize>,
        coord: Coord<f64>,
    ) -> Option<ContactTarget> {
        let others = move || {
            lines
                .features()
                .iter()
                .enumerate()
                .filter(move |(index, _)| !own.contains(index))
        };

        let mut nearest_vertex: Option<(f64, Coord<f64>)> = None;
        for (_, feature) in others() {
            for vertex in &feature.geometry.0 {
                let delta = *vertex - coord;
                let distance = delta.x.hypot(delta.y);
                match nearest_vertex {
                    Some((best, _)) if distance >= best - self.eps => {}
                    _ => nearest_vertex = Some((distance, *vertex)),
                }
            }
        }
        if let Some((distance, vertex)) = nearest_vertex {
            if distance <= self.eps {
                return None;
            }
            if distance <= self.tolerance {
                return Some(ContactTarget::Vertex(vertex));
            }
        }

        let mut nearest: Option<(f64, VertexRef, Coord<f64>)> = None;
        for (feature_index, feature) in others() {
            for (segment, edge) in feature.geometry.lines().enumerate() {
                let (distance, target) = project_onto(&edge, coord);
                match nearest {
                    Some((best, _, _)) if distance >= best - self.eps => {}
                    _ => {
                        let at = VertexRef {
                            feature: feature_index,
                            vertex: segment + 1,
                        };
                        nearest = Some((distance, at, target));
                    }
                }
            }
        }
        let (distance, at, target) = nearest?;
        (distance > self.eps && distance <= self.tolerance)
            .then_some(ContactTarget::Edge { at, target })
    }

    fn on_boundary(&self, coord: Coord<f64>) -> bool {
        nearest_edge(self.boundary_edges.iter(), coord, self.eps)
            .is_some_and(|(distance, _)| distance <= self.eps)
    }
}

enum ContactTarget {
    Vertex(Coord<f64>),
    /// `at` is where the projected point is inserted into the target contact.
    Edge { at: VertexRef, target: Coord<f64> },
}

/// Nearest edge projection; equally near edges keep the earliest one.
fn nearest_edge<'a>(
    edges: impl Iterator<Item = &'a Line<f64>>,
    coord: Coord<f64>,
    eps: f64,
) -> Option<(f64, Coord<f64>)> {
    let mut best: Option<(f64, Coord<f64>)> = None;
    for edge in edges {
        let (distance, target) = project_onto(edge, coord);
        match best {
            Some((best_distance, _)) if distance >= best_distance - eps => {}
            _ => best = Some((distance, target)),
        }
    }
    best
}

/// Groups contact vertices sharing exactly the same location, in order of
/// first occurrence.
fn coincident_groups(lines: &LineSet) -> Vec<Vec<VertexRef>> {
    let mut slots: HashMap<(u64, u64), usize> = HashMap::new();
    let mut groups: Vec<Vec<VertexRef>> = Vec::new();
    for at in lines.vertex_refs() {
        let Some(coord) = lines.vertex(at) else {
            continue;
        };
        let key = coord_key(coord);
        match slots.get(&key) {
            Some(&slot) => groups[slot].push(at),
            None => {
                slots.insert(key, groups.len());
                groups.push(vec![at]);
            }
        }
    }
    groups
}

fn refs_at(lines: &LineSet, location: Coord<f64>) -> Vec<VertexRef> {
    let key = coord_key(location);
    lines
        .vertex_refs()
        .filter(|at| lines.vertex(*at).is_some_and(|coord| coord_key(coord) == key))
        .collect()
}

fn coord_key(coord: Coord<f64>) -> (u64, u64) {
    // +0.0 folds negative zero into positive zero.
    ((coord.x + 0.0).to_bits(), (coord.y + 0.0).to_bits())
}

fn move_group(lines: &mut LineSet, group: &[VertexRef], target: Coord<f64>) {
    for at in group {
        lines.set_vertex(*at, target);
    }
}

#[cfg(test)]
mod tests {
    use super::{snap, snap_with_options, SnapError, SnapOptions};
    use crate::model::feature::{LineFeature, LineSet, VertexRef};
    use geo::{coord, LineString, Polygon};

    fn unit_square_boundary() -> LineSet {
        LineSet::from_polygon_exterior(&Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        ))
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let contacts = LineSet::default();
        let boundary = unit_square_boundary();
        assert_eq!(
            snap(&contacts, &boundary, 0.0),
            Err(SnapError::InvalidTolerance(0.0))
        );
        assert!(snap(&contacts, &boundary, f64::NAN).is_err());
    }

    #[test]
    fn merges_nearby_endpoints_onto_first_anchor() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.0, 0.5), (0.5, 0.5)]),
            LineFeature::from_xy(&[(0.505, 0.502), (0.5, 1.0)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(
            snapped.vertex(VertexRef { feature: 1, vertex: 0 }),
            Some(coord! { x: 0.5, y: 0.5 })
        );
    }

    #[test]
    fn projects_undershoot_onto_boundary_edge() {
        let contacts = LineSet::new(vec![LineFeature::from_xy(&[(0.004, 0.5), (0.996, 0.5)])]);
        let (snapped, report) =
            snap_with_options(&contacts, &unit_square_boundary(), 0.01, &SnapOptions::default())
                .unwrap();
        let start = snapped.vertex(VertexRef { feature: 0, vertex: 0 }).unwrap();
        let end = snapped.vertex(VertexRef { feature: 0, vertex: 1 }).unwrap();
        assert!(start.x.abs() < 1e-12 && (start.y - 0.5).abs() < 1e-12);
        assert!((end.x - 1.0).abs() < 1e-12);
        assert_eq!(report.boundary_snaps, 2);
        assert!(report.converged);
    }

    #[test]
    fn projects_t_junction_onto_other_contact() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.0, 0.5), (1.0, 0.5)]),
            LineFeature::from_xy(&[(0.5, 1.0), (0.5, 0.506)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        let tip = snapped.vertex(VertexRef { feature: 1, vertex: 1 }).unwrap();
        assert!((tip.x - 0.5).abs() < 1e-12);
        assert!((tip.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn leaves_far_vertices_unmoved() {
        let contacts = LineSet::new(vec![LineFeature::from_xy(&[(0.2, 0.2), (0.8, 0.8)])]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(snapped, contacts);
    }

    #[test]
    fn boundary_vertex_is_not_pulled_onto_contact_edge() {
        // The tip touches the boundary and also lies near the first contact.
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.0, 0.995), (0.5, 0.995)]),
            LineFeature::from_xy(&[(0.3, 0.5), (0.3, 1.0)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        let tip = snapped.vertex(VertexRef { feature: 1, vertex: 1 }).unwrap();
        assert_eq!(tip, coord! { x: 0.3, y: 1.0 });
    }

    #[test]
    fn snapping_twice_is_a_no_op() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.003, 0.4), (0.997, 0.6)]),
            LineFeature::from_xy(&[(0.5, 0.003), (0.51, 0.505)]),
            LineFeature::from_xy(&[(0.52, 0.515), (0.45, 0.993)]),
        ]);
        let boundary = unit_square_boundary();
        let once = snap(&contacts, &boundary, 0.02).unwrap();
        let twice = snap(&once, &boundary, 0.02).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn shallow_crossing_contacts_share_a_vertex_and_converge() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.0, 0.4), (0.5, 0.5), (1.0, 0.6)]),
            LineFeature::from_xy(&[(0.0, 0.6), (0.5005, 0.5), (1.0, 0.4)]),
        ]);
        let boundary = unit_square_boundary();

        let (once, report) =
            snap_with_options(&contacts, &boundary, 0.01, &SnapOptions::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.contact_snaps, 1);
        assert_eq!(
            once.vertex(VertexRef { feature: 0, vertex: 1 }),
            Some(coord! { x: 0.5005, y: 0.5 })
        );
        assert_eq!(
            once.vertex(VertexRef { feature: 1, vertex: 1 }),
            Some(coord! { x: 0.5005, y: 0.5 })
        );

        let (twice, again) =
            snap_with_options(&once, &boundary, 0.01, &SnapOptions::default()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(again.total_moves(), 0);
    }

    #[test]
    fn edge_projection_is_inserted_into_target_contact() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.0, 0.5), (1.0, 0.5)]),
            LineFeature::from_xy(&[(0.5, 1.0), (0.5, 0.506)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(snapped.features()[0].geometry.0.len(), 3);
        assert_eq!(
            snapped.vertex(VertexRef { feature: 0, vertex: 1 }),
            snapped.vertex(VertexRef { feature: 1, vertex: 1 })
        );
    }

    #[test]
    fn boundary_edge_wins_over_equally_near_contact_edge() {
        // The start is 0.004 from the left boundary and from the second contact.
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.004, 0.5), (1.0, 0.5)]),
            LineFeature::from_xy(&[(0.008, 0.0), (0.008, 1.0)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(
            snapped.vertex(VertexRef { feature: 0, vertex: 0 }),
            Some(coord! { x: 0.0, y: 0.5 })
        );
        assert_eq!(snapped.features()[1], contacts.features()[1]);
    }

    #[test]
    fn endpoint_equidistant_from_two_anchors_takes_the_earlier_one() {
        let contacts = LineSet::new(vec![
            LineFeature::from_xy(&[(0.1, 0.5), (0.4, 0.5)]),
            LineFeature::from_xy(&[(0.412, 0.5), (0.412, 0.9)]),
            LineFeature::from_xy(&[(0.406, 0.1), (0.406, 0.5)]),
        ]);
        let snapped = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(
            snapped.vertex(VertexRef { feature: 2, vertex: 1 }),
            Some(coord! { x: 0.4, y: 0.5 })
        );
        assert_eq!(
            snapped.vertex(VertexRef { feature: 0, vertex: 1 }),
            Some(coord! { x: 0.4, y: 0.5 })
        );
        assert_eq!(
            snapped.vertex(VertexRef { feature: 1, vertex: 0 }),
            Some(coord! { x: 0.412, y: 0.5 })
        );
    }

    #[test]
    fn does_not_mutate_input() {
        let contacts = LineSet::new(vec![LineFeature::from_xy(&[(0.004, 0.5), (0.996, 0.5)])]);
        let before = contacts.clone();
        let _ = snap(&contacts, &unit_square_boundary(), 0.01).unwrap();
        assert_eq!(contacts, before);
    }
}
