/*!
Rust implementation of the Poisson surface reconstruction on an adaptive 3D Delaunay
tetrahedralization, after [Kazhdan, Bolitho and Hoppe](https://hhoppe.com/poissonrecon.pdf).

Oriented sample points are inserted in a Delaunay triangulation, which is refined with Steiner
points. The indicator function of the sampled solid is then obtained by solving a discrete
Poisson equation whose unknowns are the values at the triangulation vertices, and evaluated
anywhere by barycentric interpolation.
*/

#![allow(clippy::type_complexity, clippy::too_many_arguments)]
#![warn(missing_docs)]

/// Floating-point type used by this library.
pub type Real = f64;

extern crate nalgebra as na;
extern crate parry3d_f64 as parry;

pub use self::conjugate_gradient::solve_conjugate_gradient;
pub use self::error::{
    FieldError, GeometryError, InsertionError, ReconstructionError, SolverError, TopologyError,
};
pub use self::implicit_field::{FieldValue, ImplicitField, LocateHint, FIELD_SENTINEL};
pub use self::linear_solver::{CholeskySolver, ConjugateGradientSolver, SparseLinearSolver};
pub use self::poisson::{PoissonParameters, PoissonReconstruction, ReconstructionState};
pub use self::poisson_vector_field::DivergenceScheme;
pub use self::triangulation::{CellId, Edge, Triangulation, VertexId, VertexKind};

mod conjugate_gradient;
pub mod dual_geometry;
pub mod error;
pub mod geometry;
mod implicit_field;
pub mod linear_solver;
mod poisson;
pub mod poisson_system;
pub mod poisson_vector_field;
pub mod refinement;
pub mod triangulation;
