//! Delaunay refinement: Steiner points are inserted at the circumcenters of badly shaped or
//! oversized cells.

use crate::triangulation::{CellId, Triangulation, VertexId, VertexKind};
use crate::Real;
use na::{Point3, Vector3};
use parry::bounding_volume::BoundingSphere;
use std::collections::VecDeque;

// The circumcenter of `cell` if the cell violates one of the bounds and the circumcenter lies
// in the refinement domain.
fn refinement_point(
    tr: &Triangulation,
    cell: CellId,
    radius_edge_ratio_bound: Real,
    cell_radius_bound: Real,
    domain: &BoundingSphere,
) -> Option<Point3<Real>> {
    let (center, squared_radius) = tr.circumsphere(cell)?;

    if na::distance(&center, domain.center()) > domain.radius() {
        return None;
    }

    let radius = squared_radius.sqrt();
    let points = tr.cell_points(cell);
    let shortest_edge = (0..4)
        .flat_map(|i| (i + 1..4).map(move |j| (i, j)))
        .map(|(i, j)| na::distance(&points[i], &points[j]))
        .fold(Real::MAX, Real::min);

    let badly_shaped =
        radius_edge_ratio_bound > 0.0 && radius > radius_edge_ratio_bound * shortest_edge;
    let too_big = cell_radius_bound > 0.0 && radius > cell_radius_bound;

    (badly_shaped || too_big).then_some(center)
}

/// Refines the triangulation until every finite cell whose circumcenter lies in
/// `enlarged_sphere` has a circumradius to shortest edge ratio below `radius_edge_ratio_bound`
/// and a circumradius below `cell_radius_bound`.
///
/// A zero bound disables the corresponding criterion. Refinement also stops once the
/// triangulation has `max_vertices` vertices. Returns the number of Steiner points inserted.
pub fn refine(
    tr: &mut Triangulation,
    radius_edge_ratio_bound: Real,
    cell_radius_bound: Real,
    max_vertices: usize,
    enlarged_sphere: &BoundingSphere,
) -> usize {
    let mut vertex_count = tr.number_of_vertices();
    let mut inserted = 0;
    let mut queue: VecDeque<(CellId, [VertexId; 4])> = tr
        .finite_cells()
        .map(|c| (c, *tr.cell(c).vertices()))
        .collect();

    while let Some((cell, vertices)) = queue.pop_front() {
        if vertex_count >= max_vertices {
            tracing::debug!("refinement stopped at the vertex cap ({max_vertices})");
            break;
        }

        // The cell was destroyed, and its slot maybe reused, by a later insertion.
        if !tr.is_alive(cell) || tr.cell(cell).vertices() != &vertices {
            continue;
        }

        let Some(steiner) = refinement_point(
            tr,
            cell,
            radius_edge_ratio_bound,
            cell_radius_bound,
            enlarged_sphere,
        ) else {
            continue;
        };

        match tr.insert_with_hint(steiner, Vector3::zeros(), VertexKind::Steiner, Some(cell)) {
            Ok((v, true)) => {
                vertex_count += 1;
                inserted += 1;

                for c in tr.incident_cells(v) {
                    if !tr.is_infinite_cell(c) {
                        queue.push_back((c, *tr.cell(c).vertices()));
                    }
                }
            }
            Ok((_, false)) => {}
            Err(err) => tracing::warn!("Steiner point skipped: {err}"),
        }
    }

    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use parry::bounding_volume::BoundingVolume;

    fn sample_box() -> Triangulation {
        let mut tr = Triangulation::new();
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.1, 0.0),
            Point3::new(0.1, 2.0, 0.2),
            Point3::new(0.0, 0.2, 2.0),
            Point3::new(2.1, 2.0, 1.9),
            Point3::new(1.0, 1.1, 0.9),
        ];
        tr.insert_points(points.into_iter().map(|p| (p, Vector3::zeros())));
        tr
    }

    fn all_cells_are_good(
        tr: &Triangulation,
        ratio: Real,
        size: Real,
        domain: &BoundingSphere,
    ) -> bool {
        tr.finite_cells()
            .all(|c| refinement_point(tr, c, ratio, size, domain).is_none())
    }

    #[test]
    fn refinement_meets_the_size_bound() {
        let mut tr = sample_box();
        let domain = tr.input_points_bounding_sphere().loosened(0.5);
        let inserted = refine(&mut tr, 2.5, 0.6, 100_000, &domain);

        assert!(inserted > 0);
        assert!(tr.is_valid());
        assert!(tr.is_delaunay());
        assert!(all_cells_are_good(&tr, 2.5, 0.6, &domain));
        assert_eq!(
            tr.finite_vertices()
                .filter(|v| tr.vertex(*v).kind() == VertexKind::Steiner)
                .count(),
            inserted
        );
    }

    #[test]
    fn refinement_is_idempotent() {
        let mut tr = sample_box();
        let domain = tr.input_points_bounding_sphere();
        refine(&mut tr, 2.5, 0.8, 100_000, &domain);
        assert_eq!(refine(&mut tr, 2.5, 0.8, 100_000, &domain), 0);
    }

    #[test]
    fn zero_bounds_disable_refinement() {
        let mut tr = sample_box();
        let domain = tr.input_points_bounding_sphere();
        assert_eq!(refine(&mut tr, 0.0, 0.0, 100_000, &domain), 0);
        assert_eq!(tr.number_of_vertices(), 6);
    }

    #[test]
    fn vertex_cap_is_honored() {
        let mut tr = sample_box();
        let domain = tr.input_points_bounding_sphere();
        let inserted = refine(&mut tr, 2.5, 0.05, 20, &domain);
        assert_eq!(inserted, 14);
        assert_eq!(tr.number_of_vertices(), 20);
    }
}
