//! Line-network topology: vertex snapping and polygonization.
//!
//! # Responsibility
//! - Turn loosely digitised contacts into an exactly coincident network.
//! - Derive the planar faces enclosed by that network and the boundary.
//!
//! # Invariants
//! - Inputs are never mutated; every stage returns new geometry.
//! - Ties are broken by input order so output is reproducible.

pub mod polygonize;
pub mod snap;

use geo::{Closest, ClosestPoint, Coord, EuclideanDistance, Line, Point};

/// Nearest point of `line` to `coord` and the distance to it.
pub(crate) fn project_onto(line: &Line<f64>, coord: Coord<f64>) -> (f64, Coord<f64>) {
    let point = Point::from(coord);
    let target = match line.closest_point(&point) {
        Closest::Intersection(target) | Closest::SinglePoint(target) => target,
        Closest::Indeterminate => Point::from(line.start),
    };
    (point.euclidean_distance(&target), target.0)
}

/// Largest absolute coordinate value across `coords`, at least 1.
pub(crate) fn coordinate_scale<'a>(coords: impl IntoIterator<Item = &'a Coord<f64>>) -> f64 {
    coords
        .into_iter()
        .fold(1.0_f64, |scale, c| scale.max(c.x.abs()).max(c.y.abs()))
}

pub(crate) fn format_coord(coord: Coord<f64>) -> String {
    format!("({}, {})", coord.x, coord.y)
}
