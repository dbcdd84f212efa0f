//! Assembly of the discrete Poisson equation, one row per unconstrained vertex.

use crate::dual_geometry::cotangent_weight;
use crate::error::TopologyError;
use crate::poisson_vector_field::{divergence_with, DivergenceScheme};
use crate::triangulation::{Edge, Triangulation, VertexId, VertexKind};
use crate::Real;
use rayon::prelude::*;

/// One assembled row of the linear system.
#[derive(Clone, Debug, PartialEq)]
pub struct PoissonRow {
    /// Index of the row, i.e. of the unconstrained vertex it was built for.
    pub row: usize,
    /// Right-hand side: the divergence at the vertex, minus the contributions of constrained
    /// neighbors.
    pub rhs: Real,
    /// Nonzero coefficients as `(column, value)`. The diagonal comes last.
    pub coefficients: Vec<(usize, Real)>,
}

impl PoissonRow {
    /// The diagonal coefficient of this row.
    pub fn diagonal(&self) -> Real {
        self.coefficients
            .iter()
            .filter(|(col, _)| *col == self.row)
            .map(|(_, val)| *val)
            .sum()
    }
}

/// The edge between `vi` and `vj`, looked up from the vertex with the largest row index.
///
/// Both endpoints then get bitwise identical cotangent weights, which keeps the matrix
/// symmetric.
pub fn sorted_edge(tr: &Triangulation, vi: VertexId, vj: VertexId) -> Result<Edge, TopologyError> {
    let key = |v: VertexId| (tr.vertex(v).index(), v);
    let (from, to) = if key(vi) > key(vj) { (vi, vj) } else { (vj, vi) };
    tr.is_edge(from, to)
        .ok_or(TopologyError::MissingEdge { from, to })
}

/// Assembles the row of the unconstrained vertex `vi`.
///
/// Input samples get the extra `lambda` on their diagonal. Steiner points get none.
pub fn assemble_poisson_row(
    tr: &Triangulation,
    vi: VertexId,
    lambda: Real,
    scheme: DivergenceScheme,
) -> Result<PoissonRow, TopologyError> {
    let vertex = tr.vertex(vi);
    let row = vertex
        .index()
        .ok_or(TopologyError::UnindexedVertex { vertex: vi })?;
    let mut rhs = divergence_with(tr, vi, scheme);
    let mut coefficients = vec![];
    let mut diagonal = 0.0;

    for vj in tr.incident_vertices(vi) {
        if tr.is_infinite_vertex(vj) {
            continue;
        }

        let edge = sorted_edge(tr, vi, vj)?;
        let cij = cotangent_weight(tr, &edge)?;
        let neighbor = tr.vertex(vj);

        if neighbor.is_constrained() {
            rhs -= cij * neighbor.f();
        } else {
            let col = neighbor
                .index()
                .ok_or(TopologyError::UnindexedVertex { vertex: vj })?;
            coefficients.push((col, -cij));
        }

        diagonal += cij;
    }

    if vertex.kind() == VertexKind::Input {
        diagonal += lambda;
    }

    coefficients.push((row, diagonal));

    Ok(PoissonRow {
        row,
        rhs,
        coefficients,
    })
}

/// Assembles the rows of all the unconstrained vertices, sorted by row index.
///
/// The vertices must have been indexed with
/// [`Triangulation::index_unconstrained_vertices`] beforehand.
pub fn assemble_poisson_system(
    tr: &Triangulation,
    lambda: Real,
    scheme: DivergenceScheme,
) -> Result<Vec<PoissonRow>, TopologyError> {
    let unknowns: Vec<_> = tr
        .finite_vertices()
        .filter(|v| !tr.vertex(*v).is_constrained())
        .collect();

    let mut rows = unknowns
        .par_iter()
        .map(|v| assemble_poisson_row(tr, *v, lambda, scheme))
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by_key(|row| row.row);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::{Point3, Vector3};

    fn cube_with_center() -> Triangulation {
        let mut tr = Triangulation::new();
        for i in 0..8 {
            let corner = Vector3::new(
                (i & 1) as Real * 2.0 - 1.0,
                ((i >> 1) & 1) as Real * 2.0 - 1.0,
                ((i >> 2) & 1) as Real * 2.0 - 1.0,
            );
            // Jittered so that no five corners are cospherical.
            let jitter = Vector3::new(0.013, -0.007, 0.011) * i as Real;
            tr.insert(
                Point3::from(corner + jitter),
                corner.normalize(),
                VertexKind::Input,
            )
            .unwrap();
        }
        tr.insert(
            Point3::new(0.1, -0.05, 0.02),
            Vector3::zeros(),
            VertexKind::Steiner,
        )
        .unwrap();
        tr
    }

    #[test]
    fn lone_vertex_row_only_holds_the_regularization() {
        let mut tr = Triangulation::new();
        let v = tr
            .insert(Point3::origin(), Vector3::z(), VertexKind::Input)
            .unwrap();
        assert_eq!(tr.index_unconstrained_vertices(), 1);

        let row = assemble_poisson_row(&tr, v, 0.1, DivergenceScheme::Standard).unwrap();
        assert_eq!(row.row, 0);
        assert_eq!(row.rhs, 0.0);
        assert_eq!(row.coefficients, vec![(0, 0.1)]);

        let mut tr = Triangulation::new();
        let v = tr
            .insert(Point3::origin(), Vector3::zeros(), VertexKind::Steiner)
            .unwrap();
        tr.index_unconstrained_vertices();
        let row = assemble_poisson_row(&tr, v, 0.1, DivergenceScheme::Standard).unwrap();
        assert_eq!(row.diagonal(), 0.0);
    }

    #[test]
    fn unindexed_vertex_is_reported() {
        let mut tr = cube_with_center();
        let v = tr.finite_vertices().next().unwrap();
        tr.vertex_mut(v).constrain(0.0);
        tr.index_unconstrained_vertices();
        assert_eq!(
            assemble_poisson_row(&tr, v, 0.1, DivergenceScheme::Standard),
            Err(TopologyError::UnindexedVertex { vertex: v })
        );
    }

    #[test]
    fn rows_are_symmetric_and_diagonally_dominant() {
        let mut tr = cube_with_center();
        let pinned = tr.any_vertex_on_convex_hull().unwrap();
        tr.vertex_mut(pinned).constrain(0.0);
        let n = tr.index_unconstrained_vertices();
        assert_eq!(n, 8);

        let rows = assemble_poisson_system(&tr, 0.1, DivergenceScheme::Standard).unwrap();
        assert_eq!(rows.len(), n);
        let mut dense = na::DMatrix::<Real>::zeros(n, n);

        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.row, i);
            for (col, val) in &row.coefficients {
                dense[(row.row, *col)] += *val;
            }
        }

        assert_eq!(dense, dense.transpose());

        for i in 0..n {
            let off_diagonal: Real = (0..n).filter(|j| *j != i).map(|j| dense[(i, j)].abs()).sum();
            assert!(dense[(i, i)] >= off_diagonal - 1.0e-12);
        }
    }

    #[test]
    fn constrained_neighbors_move_to_the_rhs() {
        let mut tr = cube_with_center();
        let center = tr.finite_vertices().last().unwrap();
        tr.index_unconstrained_vertices();
        let free = assemble_poisson_row(&tr, center, 0.1, DivergenceScheme::Standard).unwrap();

        let neighbors: Vec<_> = tr
            .incident_vertices(center)
            .into_iter()
            .filter(|v| !tr.is_infinite_vertex(*v))
            .collect();
        for v in &neighbors {
            tr.vertex_mut(*v).constrain(2.0);
        }
        tr.index_unconstrained_vertices();
        let pinned = assemble_poisson_row(&tr, center, 0.1, DivergenceScheme::Standard).unwrap();

        // The Steiner center only keeps its diagonal, and every weight moved to the rhs.
        assert_eq!(pinned.coefficients.len(), 1);
        assert_relative_eq!(pinned.diagonal(), free.diagonal(), epsilon = 1.0e-12);
        assert_relative_eq!(
            pinned.rhs,
            free.rhs - 2.0 * free.diagonal(),
            epsilon = 1.0e-12
        );
    }
}
