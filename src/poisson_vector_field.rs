//! Divergence of the normal field sampled at the input points.

use crate::geometry;
use crate::triangulation::{CellId, Triangulation, VertexId};
use crate::Real;
use na::{Point3, Vector3};

/// The discretization of the divergence of the normal field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum DivergenceScheme {
    /// Flux of the cell normals through the facets opposite to the vertex.
    #[default]
    Standard,
    /// Same flux, with each term weighted by the solid angle of the facet and the inverse of
    /// its mean distance to the vertex. Less sensitive to badly shaped cells.
    Normalized,
}

/// Average of the four vertex normals of a cell, normalized.
///
/// Returns the zero vector if the normals cancel out.
pub fn cell_normal(tr: &Triangulation, cell: CellId) -> Vector3<Real> {
    let n: Vector3<Real> = tr
        .cell(cell)
        .vertices()
        .iter()
        .map(|v| tr.vertex(*v).normal())
        .sum();
    let sq_norm = n.norm_squared();

    if sq_norm != 0.0 {
        n / sq_norm.sqrt()
    } else {
        Vector3::zeros()
    }
}

// The facet of `cell` opposite to `v`, and its unit normal pointing away from `v`.
fn opposite_facet(
    tr: &Triangulation,
    cell: CellId,
    v: VertexId,
) -> Option<([Point3<Real>; 3], Vector3<Real>)> {
    let index = tr.cell(cell).index_of(v)?;
    let points = tr.cell_points(cell);
    let a = points[(index + 1) % 4];
    let b = points[(index + 2) % 4];
    let c = points[(index + 3) % 4];
    let nn = if index % 2 == 0 {
        geometry::scaled_normal(&a, &b, &c)
    } else {
        geometry::scaled_normal(&a, &c, &b)
    };

    Some(([a, b, c], nn.try_normalize(0.0)?))
}

/// The divergence of the normal field at `v`, with the given scheme.
pub fn divergence_with(tr: &Triangulation, v: VertexId, scheme: DivergenceScheme) -> Real {
    match scheme {
        DivergenceScheme::Standard => divergence(tr, v),
        DivergenceScheme::Normalized => divergence_normalized(tr, v),
    }
}

/// The flux of the cell normals out of the star of `v`.
///
/// Infinite cells and cells with a null normal do not contribute. A vertex without incident
/// cells has a zero divergence.
pub fn divergence(tr: &Triangulation, v: VertexId) -> Real {
    let mut div = 0.0;

    for cell in tr.incident_cells(v) {
        if tr.is_infinite_cell(cell) {
            continue;
        }

        let n = cell_normal(tr, cell);
        if n == Vector3::zeros() {
            continue;
        }

        if let Some(([a, b, c], nn)) = opposite_facet(tr, cell, v) {
            div += n.dot(&nn) * geometry::triangle_area(&a, &b, &c);
        }
    }

    div
}

/// Variant of [`divergence`] where the flux through each facet is multiplied by the solid
/// angle it subtends at `v` and by three times the inverse of the sum of its distances to `v`.
pub fn divergence_normalized(tr: &Triangulation, v: VertexId) -> Real {
    let x = *tr.vertex(v).point();
    let mut div = 0.0;

    for cell in tr.incident_cells(v) {
        if tr.is_infinite_cell(cell) {
            continue;
        }

        let n = cell_normal(tr, cell);
        if n == Vector3::zeros() {
            continue;
        }

        if let Some(([a, b, c], nn)) = opposite_facet(tr, cell, v) {
            let area = geometry::triangle_area(&a, &b, &c);
            let solid_angle = geometry::solid_angle(&x, &a, &b, &c);
            let length = na::distance(&x, &a) + na::distance(&x, &b) + na::distance(&x, &c);
            div += n.dot(&nn) * area * solid_angle * 3.0 / length;
        }
    }

    div
}
