use crate::Real;
use na::DVector;
use nalgebra_sparse::CscMatrix;

/// Solves `a * x = b` for a symmetric positive-definite `a`, starting from the current `x`.
///
/// Stops once the relative residual `|b - a x| / |b|` drops below `tolerance`. Returns the
/// number of iterations performed and the last relative residual.
pub fn solve_conjugate_gradient(
    a: &CscMatrix<Real>,
    b: &DVector<Real>,
    x: &mut DVector<Real>,
    max_iterations: usize,
    tolerance: Real,
) -> (usize, Real) {
    let b_norm = b.norm();

    if b_norm == 0.0 {
        x.fill(0.0);
        return (0, 0.0);
    }

    let mut r = b - a * &*x;
    let mut p = r.clone();
    let mut prev_rr = r.dot(&r);

    for i in 0..max_iterations {
        let residual = prev_rr.sqrt() / b_norm;
        if residual <= tolerance {
            return (i, residual);
        }

        let ap = a * &p;
        let alpha = prev_rr / p.dot(&ap);
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);
        let rr = r.dot(&r);
        let beta = rr / prev_rr;
        prev_rr = rr;
        p.axpy(1.0, &r, beta);
    }

    (max_iterations, prev_rr.sqrt() / b_norm)
}
