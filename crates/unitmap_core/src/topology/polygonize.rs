//! Lines-to-faces polygonization of a planar line network.
//!
//! # Responsibility
//! - Node the union of contact and boundary lines (crossings, T-junctions,
//!   collinear overlaps) into a planar graph.
//! - Reject dangling contact ends inside the boundary; prune overshoots
//!   outside it.
//! - Walk the graph's faces and return the bounded ones inside the boundary.
//!
//! # Invariants
//! - Output faces do not overlap and together cover the boundary interior.
//! - Zero-area faces are never returned.
//! - Output order is sorted by lowest exterior vertex, independent of the
//!   order edges were discovered in.
//!
//! Nothing here knows about geology; any closed line network works.

use crate::model::feature::LineSet;
use crate::topology::{format_coord, project_onto};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Contains, Coord, InteriorPoint, Line, LineString, Point, Polygon};
use log::{error, info};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

pub type TopologyResult<T> = Result<T, TopologyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("boundary is empty")]
    EmptyBoundary,

    #[error("boundary line {feature_index} is not a closed ring")]
    BoundaryNotClosed { feature_index: usize },

    #[error("contact {} ends at {} without closing a face", feature_label(.feature), vertex_label(.vertex))]
    OpenContact {
        vertex: Coord<f64>,
        feature: Option<usize>,
    },
}

fn feature_label(feature: &Option<usize>) -> String {
    feature.map_or_else(|| "?".to_string(), |index| index.to_string())
}

fn vertex_label(vertex: &Coord<f64>) -> String {
    format_coord(*vertex)
}

/// Builds the faces enclosed by `contacts` and `boundary`.
///
/// # Errors
/// - `EmptyBoundary` / `BoundaryNotClosed` when the boundary is not a set
///   of closed rings.
/// - `OpenContact` for the first dangling contact end (in input order) that
///   lies inside the boundary.
pub fn build_faces(contacts: &LineSet, boundary: &LineSet) -> TopologyResult<Vec<Polygon<f64>>> {
    let region = boundary_region(boundary)?;
    let tolerance = Tolerances::for_inputs(contacts, boundary);

    let mut graph = PlanarGraph::node(contacts, boundary, tolerance.eps);
    graph.prune_dangles(&region)?;
    let faces = graph.faces(&region, tolerance.area_eps);

    info!(
        "event=build_faces module=topology status=ok nodes={} edges={} faces={}",
        graph.nodes.len(),
        graph.edges.len(),
        faces.len()
    );
    Ok(faces)
}

fn boundary_region(boundary: &LineSet) -> TopologyResult<Vec<Polygon<f64>>> {
    if boundary.is_empty() {
        return Err(TopologyError::EmptyBoundary);
    }
    boundary
        .features()
        .iter()
        .enumerate()
        .map(|(feature_index, feature)| {
            let ring = &feature.geometry;
            if ring.0.len() < 4 || !ring.is_closed() {
                error!(
                    "event=build_faces module=topology status=error error_code=boundary_not_closed feature={}",
                    feature_index
                );
                return Err(TopologyError::BoundaryNotClosed { feature_index });
            }
            Ok(Polygon::new(ring.clone(), vec![]))
        })
        .collect()
}

fn inside(region: &[Polygon<f64>], coord: Coord<f64>) -> bool {
    let point = Point::from(coord);
    region.iter().any(|polygon| polygon.contains(&point))
}

#[derive(Debug, Clone, Copy)]
struct Tolerances {
    /// Points closer than this are one node.
    eps: f64,
    /// Faces smaller than this are degenerate.
    area_eps: f64,
}

impl Tolerances {
    fn for_inputs(contacts: &LineSet, boundary: &LineSet) -> Self {
        let mut min = Coord { x: f64::MAX, y: f64::MAX };
        let mut max = Coord { x: f64::MIN, y: f64::MIN };
        for coord in contacts
            .features()
            .iter()
            .chain(boundary.features())
            .flat_map(|feature| feature.geometry.0.iter())
        {
            min.x = min.x.min(coord.x);
            min.y = min.y.min(coord.y);
            max.x = max.x.max(coord.x);
            max.y = max.y.max(coord.y);
        }
        let diagonal = (max.x - min.x).hypot(max.y - min.y).max(1e-3);
        Self {
            eps: diagonal * 1e-9,
            area_eps: diagonal * diagonal * 1e-12,
        }
    }
}

/// Node registry merging points closer than `eps`, backed by a grid hash.
struct NodeTable {
    coords: Vec<Coord<f64>>,
    cells: HashMap<(i64, i64), Vec<usize>>,
    eps: f64,
}

impl NodeTable {
    fn new(eps: f64) -> Self {
        Self {
            coords: Vec::new(),
            cells: HashMap::new(),
            eps,
        }
    }

    fn cell(&self, coord: Coord<f64>) -> (i64, i64) {
        let size = self.eps * 2.0;
        ((coord.x / size).floor() as i64, (coord.y / size).floor() as i64)
    }

    fn find(&self, coord: Coord<f64>) -> Option<usize> {
        let (cx, cy) = self.cell(coord);
        let mut found: Option<usize> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(ids) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &id in ids {
                    let delta = self.coords[id] - coord;
                    if delta.x.hypot(delta.y) <= self.eps {
                        found = Some(found.map_or(id, |current| current.min(id)));
                    }
                }
            }
        }
        found
    }

    fn intern(&mut self, coord: Coord<f64>) -> usize {
        if let Some(id) = self.find(coord) {
            return id;
        }
        let id = self.coords.len();
        self.coords.push(coord);
        let cell = self.cell(coord);
        self.cells.entry(cell).or_default().push(id);
        id
    }
}

struct Segment {
    line: Line<f64>,
    /// Contact feature index; `None` for boundary segments.
    contact: Option<usize>,
}

struct PlanarGraph {
    nodes: Vec<Coord<f64>>,
    /// Contact feature that first registered each node, if any.
    node_contact: Vec<Option<usize>>,
    edges: BTreeSet<(usize, usize)>,
}

impl PlanarGraph {
    /// Splits every segment at every point where another segment meets it.
    fn node(contacts: &LineSet, boundary: &LineSet, eps: f64) -> Self {
        let segments = collect_segments(contacts, boundary, eps);
        let mut table = NodeTable::new(eps);
        let mut node_contact: Vec<Option<usize>> = Vec::new();

        for segment in &segments {
            for coord in [segment.line.start, segment.line.end] {
                let id = table.intern(coord);
                if id == node_contact.len() {
                    node_contact.push(segment.contact);
                }
            }
        }

        let mut splits: Vec<Vec<Coord<f64>>> = segments
            .iter()
            .map(|segment| vec![segment.line.start, segment.line.end])
            .collect();

        for i in 0..segments.len() {
            for j in (i + 1)..segments.len() {
                let (a, b) = (segments[i].line, segments[j].line);
                if !boxes_touch(&a, &b, eps) {
                    continue;
                }
                match line_intersection(a, b) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        splits[i].push(intersection);
                        splits[j].push(intersection);
                    }
                    Some(LineIntersection::Collinear { intersection }) => {
                        for coord in [intersection.start, intersection.end] {
                            splits[i].push(coord);
                            splits[j].push(coord);
                        }
                    }
                    None => {}
                }
            }
        }

        // Near-touches that exact intersection misses (snapped T-junctions).
        let endpoints = table.coords.clone();
        for (segment, split) in segments.iter().zip(splits.iter_mut()) {
            for coord in &endpoints {
                if project_onto(&segment.line, *coord).0 <= eps {
                    split.push(*coord);
                }
            }
        }

        let mut edges = BTreeSet::new();
        for (segment, mut split) in segments.iter().zip(splits) {
            let start = segment.line.start;
            let direction = segment.line.delta();
            let length_sq = direction.x * direction.x + direction.y * direction.y;
            let param = |coord: &Coord<f64>| {
                let offset = *coord - start;
                (offset.x * direction.x + offset.y * direction.y) / length_sq
            };
            split.sort_by(|lhs, rhs| param(lhs).total_cmp(&param(rhs)));

            let mut previous: Option<usize> = None;
            for coord in split {
                let id = table.intern(coord);
                if id == node_contact.len() {
                    node_contact.push(None);
                }
                if let Some(prev) = previous {
                    if prev != id {
                        edges.insert((prev.min(id), prev.max(id)));
                    }
                }
                previous = Some(id);
            }
        }

        Self {
            nodes: table.coords,
            node_contact,
            edges,
        }
    }

    fn degrees(&self) -> Vec<usize> {
        let mut degree = vec![0; self.nodes.len()];
        for &(u, v) in &self.edges {
            degree[u] += 1;
            degree[v] += 1;
        }
        degree
    }

    /// Removes dangling chains outside the boundary; fails on one inside.
    fn prune_dangles(&mut self, region: &[Polygon<f64>]) -> TopologyResult<()> {
        let mut degree = self.degrees();
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&node| degree[node] == 1)
            .collect();

        while let Some(node) = queue.pop_front() {
            if degree[node] != 1 {
                continue;
            }
            let vertex = self.nodes[node];
            if inside(region, vertex) {
                error!(
                    "event=build_faces module=topology status=error error_code=open_contact vertex={}",
                    format_coord(vertex)
                );
                return Err(TopologyError::OpenContact {
                    vertex,
                    feature: self.node_contact[node],
                });
            }

            let Some(&edge) = self
                .edges
                .iter()
                .find(|&&(u, v)| u == node || v == node)
            else {
                continue;
            };
            self.edges.remove(&edge);
            let other = if edge.0 == node { edge.1 } else { edge.0 };
            degree[node] -= 1;
            degree[other] -= 1;
            if degree[other] == 1 {
                queue.push_back(other);
            }
        }
        Ok(())
    }

    /// Outgoing neighbours of every node, sorted counter-clockwise by angle.
    fn rotation_system(&self) -> Vec<Vec<usize>> {
        let mut around: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &(u, v) in &self.edges {
            around[u].push(v);
            around[v].push(u);
        }
        for (node, neighbours) in around.iter_mut().enumerate() {
            let origin = self.nodes[node];
            neighbours.sort_by(|&a, &b| {
                let da = self.nodes[a] - origin;
                let db = self.nodes[b] - origin;
                da.y.atan2(da.x).total_cmp(&db.y.atan2(db.x))
            });
        }
        around
    }

    /// Traces every face ring; the bounded faces come out counter-clockwise.
    fn trace_rings(&self) -> Vec<LineString<f64>> {
        let around = self.rotation_system();
        let mut half_edges: HashMap<(usize, usize), usize> = HashMap::new();
        let mut order: Vec<(usize, usize)> = Vec::new();
        for (u, neighbours) in around.iter().enumerate() {
            for &v in neighbours {
                half_edges.insert((u, v), order.len());
                order.push((u, v));
            }
        }

        let mut visited = vec![false; order.len()];
        let mut rings = Vec::new();
        for start in 0..order.len() {
            if visited[start] {
                continue;
            }
            let mut coords = Vec::new();
            let mut current = start;
            while !visited[current] {
                visited[current] = true;
                let (u, v) = order[current];
                coords.push(self.nodes[u]);

                let neighbours = &around[v];
                let Some(back) = neighbours.iter().position(|&w| w == u) else {
                    break;
                };
                let next = neighbours[(back + neighbours.len() - 1) % neighbours.len()];
                match half_edges.get(&(v, next)) {
                    Some(&id) => current = id,
                    None => break,
                }
            }
            if coords.len() >= 3 {
                coords.push(coords[0]);
                rings.push(LineString::new(coords));
            }
        }
        rings
    }

    /// Bounded faces inside `region`, with island rings attached as holes.
    fn faces(&self, region: &[Polygon<f64>], area_eps: f64) -> Vec<Polygon<f64>> {
        let mut shells: Vec<(Polygon<f64>, f64)> = Vec::new();
        let mut outers: Vec<LineString<f64>> = Vec::new();
        for ring in self.trace_rings() {
            let polygon = Polygon::new(ring, vec![]);
            let area = polygon.signed_area();
            if area > area_eps {
                shells.push((polygon, area));
            } else if area < -area_eps {
                outers.push(polygon.exterior().clone());
            }
        }

        // A clockwise ring strictly inside a shell is an island's outline.
        let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
        for outer in outers {
            let sample = Point::from(outer.0[0]);
            let host = shells
                .iter()
                .enumerate()
                .filter(|(_, (shell, _))| shell.contains(&sample))
                .min_by(|(_, (_, a)), (_, (_, b))| a.total_cmp(b))
                .map(|(index, _)| index);
            if let Some(host) = host {
                holes[host].push(outer);
            }
        }

        let mut faces: Vec<Polygon<f64>> = shells
            .into_iter()
            .zip(holes)
            .map(|((shell, _), interiors)| Polygon::new(shell.exterior().clone(), interiors))
            .filter(|face| face.unsigned_area() > area_eps)
            .filter(|face| {
                face.interior_point()
                    .is_some_and(|point| inside(region, point.0))
            })
            .collect();

        faces.sort_by(|a, b| compare_coords(lowest_vertex(a), lowest_vertex(b)));
        faces
    }
}

fn collect_segments(contacts: &LineSet, boundary: &LineSet, eps: f64) -> Vec<Segment> {
    let contact_lines = contacts
        .features()
        .iter()
        .enumerate()
        .flat_map(|(index, feature)| {
            feature.geometry.lines().map(move |line| Segment {
                line,
                contact: Some(index),
            })
        });
    let boundary_lines = boundary.features().iter().flat_map(|feature| {
        feature
            .geometry
            .lines()
            .map(|line| Segment { line, contact: None })
    });
    contact_lines
        .chain(boundary_lines)
        .filter(|segment| {
            let delta = segment.line.delta();
            delta.x.hypot(delta.y) > eps
        })
        .collect()
}

fn boxes_touch(a: &Line<f64>, b: &Line<f64>, eps: f64) -> bool {
    let (a_min_x, a_max_x) = min_max(a.start.x, a.end.x);
    let (a_min_y, a_max_y) = min_max(a.start.y, a.end.y);
    let (b_min_x, b_max_x) = min_max(b.start.x, b.end.x);
    let (b_min_y, b_max_y) = min_max(b.start.y, b.end.y);
    a_min_x <= b_max_x + eps
        && b_min_x <= a_max_x + eps
        && a_min_y <= b_max_y + eps
        && b_min_y <= a_max_y + eps
}

fn min_max(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn lowest_vertex(polygon: &Polygon<f64>) -> Coord<f64> {
    polygon
        .exterior()
        .0
        .iter()
        .copied()
        .min_by(|a, b| compare_coords(*a, *b))
        .unwrap_or(Coord { x: 0.0, y: 0.0 })
}

fn compare_coords(a: Coord<f64>, b: Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}
