//! Areas of the Voronoi faces dual to the triangulation edges, and the cotangent weights
//! derived from them.

use crate::error::{GeometryError, TopologyError};
use crate::geometry;
use crate::triangulation::{Edge, Triangulation};
use crate::Real;
use itertools::Itertools;

/// The two indices of `0..4` that differ from `i` and `j`, in increasing order.
pub fn other_two_indices(i: usize, j: usize) -> (usize, usize) {
    assert_ne!(i, j, "an edge needs two distinct local indices");
    let mut others = (0..4).filter(|k| *k != i && *k != j);
    match (others.next(), others.next()) {
        (Some(k), Some(l)) => (k, l),
        _ => panic!("local indices out of range: ({i}, {j})"),
    }
}

/// The cotangent weight of an edge: the area of its dual Voronoi face divided by its length.
pub fn cotangent_weight(tr: &Triangulation, edge: &Edge) -> Result<Real, TopologyError> {
    let (u, v) = tr.edge_vertices(edge);
    let length = na::distance(tr.vertex(u).point(), tr.vertex(v).point());
    Ok(voronoi_face_area(tr, edge)? / length)
}

/// Area of the Voronoi face dual to an edge.
///
/// The face is the polygon joining the circumcenters of the cells around the edge. If one of
/// these cells is infinite, the face is unbounded and [`voronoi_face_area_boundary`] is used
/// instead.
pub fn voronoi_face_area(tr: &Triangulation, edge: &Edge) -> Result<Real, TopologyError> {
    let cells = tr.cells_around_edge(edge)?;

    if cells.iter().any(|c| tr.is_infinite_cell(*c)) {
        return voronoi_face_area_boundary(tr, edge);
    }

    let dual_points = cells
        .iter()
        .map(|c| {
            tr.dual(*c)
                .ok_or(GeometryError::NoCircumcenter { cell: *c })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if dual_points.len() < 3 {
        let (from, to) = tr.edge_vertices(edge);
        return Err(TopologyError::InsufficientDualPoints {
            from,
            to,
            count: dual_points.len(),
        });
    }

    let apex = &dual_points[0];
    Ok(dual_points[1..]
        .iter()
        .tuple_windows()
        .map(|(b, c)| geometry::triangle_area(apex, b, c))
        .sum())
}

/// Approximate area of the part of the Voronoi face of a convex hull edge lying inside the hull.
///
/// Each finite cell around the edge contributes the quadrilateral joining the edge midpoint,
/// the circumcenters of its two facets containing the edge, and its own dual point. The dual
/// point is the circumcenter if it lies in the cell, and the centroid otherwise.
pub fn voronoi_face_area_boundary(tr: &Triangulation, edge: &Edge) -> Result<Real, TopologyError> {
    let (u, v) = tr.edge_vertices(edge);
    let pi = *tr.vertex(u).point();
    let pj = *tr.vertex(v).point();
    let midpoint = na::center(&pi, &pj);
    let mut area = 0.0;

    for c in tr.cells_around_edge(edge)? {
        if tr.is_infinite_cell(c) {
            continue;
        }

        let cell = tr.cell(c);
        let (Some(i), Some(j)) = (cell.index_of(u), cell.index_of(v)) else {
            return Err(TopologyError::BrokenAdjacency { cell: c });
        };
        let (k, l) = other_two_indices(i, j);
        let points = tr.cell_points(c);
        let (pk, pl) = (points[k], points[l]);

        let dual = tr
            .dual(c)
            .filter(|center| geometry::tetrahedron_contains(&points, center))
            .unwrap_or_else(|| geometry::centroid(&points));
        let ck = geometry::triangle_circumcenter(&pi, &pj, &pk)
            .ok_or(GeometryError::NoCircumcenter { cell: c })?;
        let cl = geometry::triangle_circumcenter(&pi, &pj, &pl)
            .ok_or(GeometryError::NoCircumcenter { cell: c })?;

        area += geometry::triangle_area(&midpoint, &dual, &ck);
        area += geometry::triangle_area(&midpoint, &dual, &cl);
    }

    Ok(area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::VertexKind;
    use approx::assert_relative_eq;
    use na::{Point3, Vector3};

    fn octahedron_with_center() -> Triangulation {
        let mut tr = Triangulation::new();
        let points = [
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, -1.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        for p in points {
            tr.insert(p, Vector3::zeros(), VertexKind::Input).unwrap();
        }
        tr
    }

    #[test]
    fn other_indices() {
        assert_eq!(other_two_indices(0, 1), (2, 3));
        assert_eq!(other_two_indices(3, 1), (0, 2));
        assert_eq!(other_two_indices(2, 0), (1, 3));
    }

    #[test]
    #[should_panic]
    fn other_indices_reject_equal_inputs() {
        let _ = other_two_indices(2, 2);
    }

    #[test]
    fn interior_edge_face_area() {
        let tr = octahedron_with_center();
        assert!(tr.is_valid());
        let center = tr.finite_vertices().last().unwrap();
        let top = tr.finite_vertices().nth(4).unwrap();
        let edge = tr.is_edge(center, top).unwrap();

        // The face dual to the center-top edge is the unit square of the circumcenters
        // (±1/2, ±1/2, 1/2) in the bisector plane z = 1/2.
        let cells = tr.cells_around_edge(&edge).unwrap();
        assert_eq!(cells.len(), 4);
        let area = voronoi_face_area(&tr, &edge).unwrap();
        assert_relative_eq!(area, 1.0, epsilon = 1.0e-10);
        assert_relative_eq!(cotangent_weight(&tr, &edge).unwrap(), 1.0, epsilon = 1.0e-10);
    }

    #[test]
    fn boundary_edge_face_area() {
        let tr = octahedron_with_center();
        let vertices: Vec<_> = tr.finite_vertices().collect();
        let (right, top) = (vertices[0], vertices[4]);
        let edge = tr.is_edge(right, top).unwrap();

        assert!(tr
            .cells_around_edge(&edge)
            .unwrap()
            .iter()
            .any(|c| tr.is_infinite_cell(*c)));

        let area = voronoi_face_area(&tr, &edge).unwrap();
        assert!(area > 0.0);
        assert_relative_eq!(area, voronoi_face_area_boundary(&tr, &edge).unwrap());
    }

    #[test]
    fn weights_are_symmetric() {
        let tr = octahedron_with_center();
        for edge in tr.finite_edges() {
            let (u, v) = tr.edge_vertices(&edge);
            let forward = tr.is_edge(u, v).unwrap();
            let backward = tr.is_edge(v, u).unwrap();
            assert_relative_eq!(
                cotangent_weight(&tr, &forward).unwrap(),
                cotangent_weight(&tr, &backward).unwrap(),
                epsilon = 1.0e-12
            );
        }
    }
}
