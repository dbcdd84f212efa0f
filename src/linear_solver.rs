//! Sparse symmetric solvers fed row by row.

use crate::conjugate_gradient::solve_conjugate_gradient;
use crate::error::SolverError;
use crate::Real;
use na::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// A solver for square sparse linear systems, assembled one row at a time.
///
/// Rows are numbered in the order they are begun, starting at 0. The system is square: it has
/// as many columns as rows.
pub trait SparseLinearSolver {
    /// Discards any assembled or factored system.
    fn reset(&mut self);
    /// Starts the next row.
    fn begin_row(&mut self);
    /// Adds `value` at `column` of the current row.
    fn add_value(&mut self, column: usize, value: Real);
    /// Closes the current row.
    fn end_row(&mut self);
    /// Prepares the assembled matrix for solving.
    fn factor(&mut self) -> Result<(), SolverError>;
    /// Solves the factored system for the given right-hand side.
    fn solve(&self, rhs: &DVector<Real>) -> Result<DVector<Real>, SolverError>;
}

/// Row-by-row storage of a sparse square matrix.
#[derive(Clone, Debug, Default)]
pub struct SparseRows {
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<Real>,
    nrows: usize,
    open: bool,
    error: Option<String>,
}

impl SparseRows {
    /// Number of rows begun so far.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    fn fail(&mut self, msg: String) {
        if self.error.is_none() {
            self.error = Some(msg);
        }
    }

    /// Starts the next row.
    pub fn begin_row(&mut self) {
        if self.open {
            self.fail(format!("row {} was never ended", self.nrows - 1));
        }

        self.open = true;
        self.nrows += 1;
    }

    /// Adds a value to the current row.
    pub fn add_value(&mut self, column: usize, value: Real) {
        if !self.open {
            self.fail(format!("value added at column {column} outside of any row"));
            return;
        }

        self.rows.push(self.nrows - 1);
        self.cols.push(column);
        self.values.push(value);
    }

    /// Closes the current row.
    pub fn end_row(&mut self) {
        if !self.open {
            self.fail("row ended without being begun".to_string());
        }

        self.open = false;
    }

    /// Converts the assembled rows to a compressed matrix. Duplicate entries are summed.
    pub fn to_csc(&self) -> Result<CscMatrix<Real>, SolverError> {
        if let Some(err) = &self.error {
            return Err(SolverError::Assembly(err.clone()));
        }

        if self.open {
            return Err(SolverError::Assembly(format!(
                "row {} was never ended",
                self.nrows - 1
            )));
        }

        let coo = CooMatrix::try_from_triplets(
            self.nrows,
            self.nrows,
            self.rows.clone(),
            self.cols.clone(),
            self.values.clone(),
        )
        .map_err(|err| SolverError::Assembly(err.to_string()))?;
        Ok(CscMatrix::from(&coo))
    }
}

fn check_finite(x: DVector<Real>) -> Result<DVector<Real>, SolverError> {
    match x.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(SolverError::NonFinite { row }),
        None => Ok(x),
    }
}

fn check_rhs(nrows: usize, rhs: &DVector<Real>) -> Result<(), SolverError> {
    if rhs.len() != nrows {
        return Err(SolverError::Assembly(format!(
            "right-hand side has {} entries for {} rows",
            rhs.len(),
            nrows
        )));
    }

    Ok(())
}

/// Direct solver based on a sparse Cholesky factorization.
///
/// The assembled matrix must be symmetric positive-definite.
#[derive(Default)]
pub struct CholeskySolver {
    rows: SparseRows,
    factorization: Option<CscCholesky<Real>>,
}

impl CholeskySolver {
    /// A solver with an empty system.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SparseLinearSolver for CholeskySolver {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn begin_row(&mut self) {
        self.factorization = None;
        self.rows.begin_row();
    }

    fn add_value(&mut self, column: usize, value: Real) {
        self.rows.add_value(column, value);
    }

    fn end_row(&mut self) {
        self.rows.end_row();
    }

    fn factor(&mut self) -> Result<(), SolverError> {
        let lhs = self.rows.to_csc()?;
        let chol = CscCholesky::factor(&lhs)
            .map_err(|err| SolverError::Factorization(format!("{err:?}")))?;
        self.factorization = Some(chol);
        Ok(())
    }

    fn solve(&self, rhs: &DVector<Real>) -> Result<DVector<Real>, SolverError> {
        let chol = self.factorization.as_ref().ok_or(SolverError::NotFactored)?;
        check_rhs(self.rows.nrows(), rhs)?;
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        let x = chol.solve(&b);
        check_finite(DVector::from_column_slice(x.as_slice()))
    }
}

/// Iterative solver based on the conjugate gradient method.
///
/// The assembled matrix must be symmetric positive-definite.
#[derive(Clone, Debug)]
pub struct ConjugateGradientSolver {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Relative residual `|b - Ax| / |b|` below which the iterations stop.
    pub tolerance: Real,
    rows: SparseRows,
    matrix: Option<CscMatrix<Real>>,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self::new(10_000, 1.0e-10)
    }
}

impl ConjugateGradientSolver {
    /// A solver with the given stopping criteria.
    pub fn new(max_iterations: usize, tolerance: Real) -> Self {
        Self {
            max_iterations,
            tolerance,
            rows: SparseRows::default(),
            matrix: None,
        }
    }
}

impl SparseLinearSolver for ConjugateGradientSolver {
    fn reset(&mut self) {
        self.rows = SparseRows::default();
        self.matrix = None;
    }

    fn begin_row(&mut self) {
        self.matrix = None;
        self.rows.begin_row();
    }

    fn add_value(&mut self, column: usize, value: Real) {
        self.rows.add_value(column, value);
    }

    fn end_row(&mut self) {
        self.rows.end_row();
    }

    fn factor(&mut self) -> Result<(), SolverError> {
        self.matrix = Some(self.rows.to_csc()?);
        Ok(())
    }

    fn solve(&self, rhs: &DVector<Real>) -> Result<DVector<Real>, SolverError> {
        let a = self.matrix.as_ref().ok_or(SolverError::NotFactored)?;
        check_rhs(self.rows.nrows(), rhs)?;
        let mut x = DVector::zeros(rhs.len());
        let (iterations, residual) =
            solve_conjugate_gradient(a, rhs, &mut x, self.max_iterations, self.tolerance);

        if !(residual <= self.tolerance) {
            return Err(SolverError::NotConverged {
                iterations,
                residual,
            });
        }

        check_finite(x)
    }
}
