//! Error types.

use crate::triangulation::{CellId, VertexId};
use thiserror::Error;

/// Errors raised by the geometric primitives.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeometryError {
    /// The tetrahedron has a (numerically) zero volume.
    #[error("degenerate tetrahedron: volume {volume:e} is too small to compute barycentric coordinates")]
    DegenerateTetrahedron {
        /// The signed volume that was found.
        volume: f64,
    },
    /// The cell has no well-defined circumcenter.
    #[error("cell {cell:?} is flat and has no circumcenter")]
    NoCircumcenter {
        /// The offending cell.
        cell: CellId,
    },
}

/// Violations of the combinatorial invariants of a Delaunay mesh.
///
/// These cannot happen on a correctly maintained triangulation: seeing one means the mesh is
/// corrupted and the computation relying on it must stop.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TopologyError {
    /// Two vertices claimed to be neighbors do not share an edge.
    #[error("vertices {from:?} and {to:?} are reported as adjacent but share no edge")]
    MissingEdge {
        /// First endpoint.
        from: VertexId,
        /// Second endpoint.
        to: VertexId,
    },
    /// Fewer than three dual points were found around an interior edge.
    #[error("the Voronoi face dual to edge ({from:?}, {to:?}) has only {count} vertices")]
    InsufficientDualPoints {
        /// First endpoint.
        from: VertexId,
        /// Second endpoint.
        to: VertexId,
        /// Number of dual points collected.
        count: usize,
    },
    /// A cell does not reference a vertex or a neighbor it should.
    #[error("adjacency of cell {cell:?} is inconsistent")]
    BrokenAdjacency {
        /// The offending cell.
        cell: CellId,
    },
    /// An unconstrained vertex was not given a row of the linear system.
    #[error("unconstrained vertex {vertex:?} has no row index")]
    UnindexedVertex {
        /// The offending vertex.
        vertex: VertexId,
    },
    /// A geometric quantity needed by a differential operator is undefined.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Failures of a single point insertion.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InsertionError {
    /// The point has non-finite coordinates.
    #[error("cannot insert a point with non-finite coordinates: {point:?}")]
    NonFinitePoint {
        /// The rejected coordinates.
        point: [f64; 3],
    },
    /// Point location failed to find any cell for the point.
    #[error("point location failed for {point:?}")]
    LocationFailed {
        /// The query coordinates.
        point: [f64; 3],
    },
    /// The conflict region could not be made star-shaped around the new point.
    #[error("the insertion cavity of {point:?} is not star-shaped")]
    NonStarCavity {
        /// The rejected coordinates.
        point: [f64; 3],
    },
}

/// Failures of the sparse linear solver.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SolverError {
    /// `solve` was called before a successful `factor`.
    #[error("the linear system must be factored before it is solved")]
    NotFactored,
    /// Rows were not assembled in order, or a row was left open.
    #[error("inconsistent row assembly: {0}")]
    Assembly(String),
    /// The factorization failed (e.g. the matrix is not positive definite).
    #[error("factorization failed: {0}")]
    Factorization(String),
    /// The substitution produced a NaN or an infinite value.
    #[error("the solution has a non-finite entry at row {row}")]
    NonFinite {
        /// First offending row.
        row: usize,
    },
    /// The iterative solver did not reach the requested tolerance.
    #[error("no convergence after {iterations} iterations (residual {residual:e})")]
    NotConverged {
        /// Iterations performed.
        iterations: usize,
        /// Last relative residual.
        residual: f64,
    },
}

/// Failures while evaluating the implicit field.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FieldError {
    /// The query fell into a cell whose barycentric coordinates are undefined.
    #[error("cannot interpolate inside cell {cell:?}: {source}")]
    DegenerateCell {
        /// The containing cell.
        cell: CellId,
        /// The underlying geometric failure.
        source: GeometryError,
    },
}

/// Errors of the reconstruction pipeline.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReconstructionError {
    /// The input points do not span a 3D volume.
    #[error("the input points do not span a volume (triangulation dimension {dimension})")]
    DegenerateInput {
        /// Dimension of the triangulation of the input points.
        dimension: i8,
    },
    /// The mesh has no convex hull vertex to pin.
    #[error("the triangulation has no vertex on its convex hull")]
    NoConvexHullVertex,
    /// Inconsistent mesh found during assembly.
    #[error("mesh consistency violated during assembly: {0}")]
    Topology(#[from] TopologyError),
    /// The linear solver failed.
    #[error("cannot solve the Poisson equation: {0}")]
    Solver(#[from] SolverError),
}
