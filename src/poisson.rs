use crate::error::ReconstructionError;
use crate::implicit_field::ImplicitField;
use crate::linear_solver::{CholeskySolver, SparseLinearSolver};
use crate::poisson_system::assemble_poisson_system;
use crate::poisson_vector_field::DivergenceScheme;
use crate::refinement::refine;
use crate::triangulation::{Triangulation, VertexKind};
use crate::Real;
use itertools::Itertools;
use na::{DVector, Point3, Vector3};
use parry::bounding_volume::{Aabb, BoundingSphere};
use std::time::Instant;

/// Parameters of the Poisson reconstruction.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PoissonParameters {
    /// Upper bound of the ratio between the circumradius of a cell and its shortest edge.
    /// Badly shaped cells are refined. Zero disables this criterion.
    pub radius_edge_ratio_bound: Real,
    /// Upper bound of the circumradius of a cell, relative to the radius of the bounding
    /// sphere of the input points. Zero disables this criterion.
    pub cell_radius_ratio: Real,
    /// The refinement stops once the triangulation has this many vertices.
    pub max_vertices: usize,
    /// Ratio between the radius of the refined domain and the radius of the bounding sphere
    /// of the input points.
    pub enlarge_ratio: Real,
    /// Regularization added to the diagonal of the rows of the input points. Larger values
    /// keep the field closer to zero at the samples.
    pub lambda: Real,
    /// Discretization of the divergence of the normal field.
    pub divergence: DivergenceScheme,
    /// Whether to insert the corners of a cube of half-width `enlarge_ratio` times the
    /// bounding radius around the input before refining. This keeps the convex hull away
    /// from the samples.
    pub enclose: bool,
}

impl Default for PoissonParameters {
    fn default() -> Self {
        Self {
            radius_edge_ratio_bound: 2.5,
            cell_radius_ratio: 0.2,
            max_vertices: 10_000_000,
            enlarge_ratio: 1.5,
            lambda: 0.1,
            divergence: DivergenceScheme::Standard,
            enclose: true,
        }
    }
}

impl PoissonParameters {
    /// Default parameters with the Delaunay refinement switched off.
    pub fn without_refinement() -> Self {
        Self {
            radius_edge_ratio_bound: 0.0,
            cell_radius_ratio: 0.0,
            ..Self::default()
        }
    }
}

/// Progress of the implicit function computation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReconstructionState {
    /// Nothing computed yet, or the triangulation changed since the last computation.
    Empty,
    /// Steiner points were inserted.
    Refined,
    /// The linear system was assembled.
    Assembled,
    /// The linear system was factored.
    Factored,
    /// The vertex values were solved for.
    Solved,
    /// The field is shifted and oriented, and can be evaluated.
    Ready,
}

/// An implicit surface reconstructed by solving a Poisson equation on a Delaunay
/// tetrahedralization of oriented sample points.
///
/// The triangulation is borrowed: the field values live on its vertices. The field is negative
/// inside the sampled solid and positive outside, with its zero level set passing through the
/// median of its values at the samples.
pub struct PoissonReconstruction<'a> {
    tr: &'a mut Triangulation,
    params: PoissonParameters,
    state: ReconstructionState,
    sink: Option<Point3<Real>>,
}

impl<'a> PoissonReconstruction<'a> {
    /// Prepares a reconstruction on the given triangulation.
    pub fn new(tr: &'a mut Triangulation, params: PoissonParameters) -> Self {
        Self {
            tr,
            params,
            state: ReconstructionState::Empty,
            sink: None,
        }
    }

    /// Inserts sample points and their normals into the triangulation, and prepares a
    /// reconstruction on it.
    ///
    /// # Parameters
    /// - `points`: the sample points.
    /// - `normals`: the oriented normals at the sample points, pointing outside the solid.
    ///   Must have the same length as `points`.
    /// - `params`: the reconstruction parameters.
    pub fn from_points_and_normals(
        tr: &'a mut Triangulation,
        points: &[Point3<Real>],
        normals: &[Vector3<Real>],
        params: PoissonParameters,
    ) -> Self {
        assert_eq!(
            points.len(),
            normals.len(),
            "Exactly one normal per point must be provided."
        );
        let mut result = Self::new(tr, params);
        result.insert(points.iter().copied().zip(normals.iter().copied()));
        result
    }

    /// Inserts sample points with their normals. Returns the number of new vertices.
    ///
    /// The implicit function must be computed again afterwards.
    pub fn insert(
        &mut self,
        points: impl IntoIterator<Item = (Point3<Real>, Vector3<Real>)>,
    ) -> usize {
        self.invalidate();
        self.tr.insert_points(points)
    }

    /// Removes every point from the triangulation.
    pub fn clear(&mut self) {
        self.invalidate();
        self.tr.clear();
    }

    fn invalidate(&mut self) {
        self.state = ReconstructionState::Empty;
        self.sink = None;
    }

    /// The triangulation carrying the field values.
    pub fn triangulation(&self) -> &Triangulation {
        &*self.tr
    }

    /// The reconstruction parameters.
    pub fn parameters(&self) -> &PoissonParameters {
        &self.params
    }

    /// The bounding sphere of the input points.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        self.tr.input_points_bounding_sphere()
    }

    /// The bounding sphere of the input points, with its radius multiplied by `ratio`.
    pub fn enlarged_bounding_sphere(&self, ratio: Real) -> BoundingSphere {
        let sphere = self.bounding_sphere();
        BoundingSphere::new(*sphere.center(), sphere.radius() * ratio)
    }

    /// Progress of the implicit function computation.
    pub fn state(&self) -> ReconstructionState {
        self.state
    }

    /// Can the implicit function be evaluated?
    pub fn is_ready(&self) -> bool {
        self.state == ReconstructionState::Ready
    }

    /// Inserts Steiner points until the cells whose circumcenter lies in the enlarged bounding
    /// sphere are well shaped and small enough. Returns the number of points inserted.
    ///
    /// A zero bound disables the corresponding criterion.
    pub fn delaunay_refinement(
        &mut self,
        radius_edge_ratio_bound: Real,
        cell_radius_bound: Real,
        max_vertices: usize,
        enlarge_ratio: Real,
    ) -> usize {
        self.invalidate();
        let domain = self.enlarged_bounding_sphere(enlarge_ratio);
        refine(
            &mut *self.tr,
            radius_edge_ratio_bound,
            cell_radius_bound,
            max_vertices,
            &domain,
        )
    }

    /// Computes the implicit function with a sparse Cholesky factorization.
    pub fn compute_implicit_function(&mut self) -> Result<(), ReconstructionError> {
        self.compute_implicit_function_with_solver(&mut CholeskySolver::new())
    }

    /// Computes the implicit function with the given linear solver.
    ///
    /// On failure, no field is available and the vertex values are unspecified.
    pub fn compute_implicit_function_with_solver<S: SparseLinearSolver>(
        &mut self,
        solver: &mut S,
    ) -> Result<(), ReconstructionError> {
        self.invalidate();

        if self.tr.dimension() < 3 {
            return Err(ReconstructionError::DegenerateInput {
                dimension: self.tr.dimension(),
            });
        }

        let t0 = Instant::now();

        if self.params.enclose {
            self.enclose_domain();
        }

        let radius = self.bounding_sphere().radius();
        let inserted = self.delaunay_refinement(
            self.params.radius_edge_ratio_bound,
            self.params.cell_radius_ratio * radius,
            self.params.max_vertices,
            self.params.enlarge_ratio,
        );
        self.state = ReconstructionState::Refined;
        tracing::info!(
            "Delaunay refinement: {} Steiner points inserted, {} vertices, {} cells ({:.3?})",
            inserted,
            self.tr.number_of_vertices(),
            self.tr.number_of_cells(),
            t0.elapsed()
        );

        if let Err(err) = self.solve_poisson(solver) {
            tracing::error!("Poisson solve failed: {err}");
            self.invalidate();
            return Err(err);
        }

        let median = self.median_value_at_input_vertices();
        let sink_value = self.set_contouring_value(median);
        tracing::debug!("field shifted by {median:e}, minimum value {sink_value:e}");
        self.state = ReconstructionState::Ready;
        Ok(())
    }

    // Inserts the corners of the cube enclosing the enlarged bounding sphere.
    fn enclose_domain(&mut self) {
        let sphere = self.bounding_sphere();
        let half_extents = Vector3::repeat(self.params.enlarge_ratio * sphere.radius());
        let corners = Aabb::from_half_extents(*sphere.center(), half_extents).vertices();

        for corner in corners {
            if let Err(err) = self.tr.insert(corner, Vector3::zeros(), VertexKind::Steiner) {
                tracing::warn!("enclosing corner skipped: {err}");
            }
        }
    }

    fn solve_poisson<S: SparseLinearSolver>(
        &mut self,
        solver: &mut S,
    ) -> Result<(), ReconstructionError> {
        let t0 = Instant::now();

        for v in self.tr.finite_vertices_mut() {
            if let Some(value) = v.constraint() {
                v.set_f(value);
            }
        }

        let mut nb_variables = self.tr.index_unconstrained_vertices();

        // The Laplacian is singular until at least one value is fixed.
        if nb_variables == self.tr.number_of_vertices() {
            let hull_vertex = self
                .tr
                .any_vertex_on_convex_hull()
                .ok_or(ReconstructionError::NoConvexHullVertex)?;
            self.tr.vertex_mut(hull_vertex).constrain(0.0);
            nb_variables = self.tr.index_unconstrained_vertices();
        }

        let rows = assemble_poisson_system(&*self.tr, self.params.lambda, self.params.divergence)?;
        self.state = ReconstructionState::Assembled;
        tracing::debug!(
            "Poisson system assembled: {} unknowns ({:.3?})",
            nb_variables,
            t0.elapsed()
        );

        if nb_variables == 0 {
            self.state = ReconstructionState::Solved;
            return Ok(());
        }

        let t0 = Instant::now();
        let mut rhs = DVector::zeros(nb_variables);
        solver.reset();

        for row in &rows {
            solver.begin_row();
            for (col, val) in &row.coefficients {
                solver.add_value(*col, *val);
            }
            solver.end_row();
            rhs[row.row] = row.rhs;
        }

        solver.factor()?;
        self.state = ReconstructionState::Factored;
        tracing::debug!("Poisson system factored ({:.3?})", t0.elapsed());

        let t0 = Instant::now();
        let solution = solver.solve(&rhs)?;
        tracing::debug!("Poisson system solved ({:.3?})", t0.elapsed());

        for v in self.tr.finite_vertices_mut() {
            if let Some(index) = v.index() {
                v.set_f(solution[index]);
            }
        }

        self.state = ReconstructionState::Solved;
        tracing::info!("Poisson equation solved for {nb_variables} unknowns");
        Ok(())
    }

    /// The median of the field values at the input samples.
    ///
    /// With an even number of samples, this is the mean of the two middle values. Returns zero
    /// if there are no input samples.
    pub fn median_value_at_input_vertices(&self) -> Real {
        let values: Vec<_> = self
            .tr
            .finite_vertices()
            .map(|v| self.tr.vertex(v))
            .filter(|v| v.kind() == VertexKind::Input)
            .map(|v| v.f())
            .sorted_by(|a, b| a.total_cmp(b))
            .collect();

        let size = values.len();

        if size == 0 {
            tracing::warn!("no input points to compute the contouring value from");
            return 0.0;
        }

        if size % 2 == 1 {
            values[size / 2]
        } else {
            0.5 * (values[size / 2 - 1] + values[size / 2])
        }
    }

    /// Shifts the field so that it vanishes where it was equal to `contouring_value`, then
    /// flips it if needed so that it is positive on the convex hull.
    ///
    /// Returns the minimum of the field, reached at [`ImplicitField::interior_seed_point`].
    pub fn set_contouring_value(&mut self, contouring_value: Real) -> Real {
        for v in self.tr.finite_vertices_mut() {
            v.set_f(v.f() - contouring_value);
        }

        let hull_value = self
            .tr
            .any_vertex_on_convex_hull()
            .map(|v| self.tr.vertex(v).f());

        if hull_value.map_or(false, |f| f < 0.0) {
            for v in self.tr.finite_vertices_mut() {
                v.set_f(-v.f());
            }
        }

        self.find_sink()
    }

    fn find_sink(&mut self) -> Real {
        let sink = self
            .tr
            .finite_vertices()
            .map(|v| self.tr.vertex(v))
            .min_by(|a, b| a.f().total_cmp(&b.f()));

        self.sink = sink.map(|v| *v.point());
        sink.map_or(Real::MAX, |v| v.f())
    }

    /// The solved implicit function, if it was computed since the last change of the
    /// triangulation.
    pub fn implicit_field(&self) -> Option<ImplicitField<'_>> {
        if !self.is_ready() {
            return None;
        }

        Some(ImplicitField::new(&*self.tr, self.sink?))
    }
}
