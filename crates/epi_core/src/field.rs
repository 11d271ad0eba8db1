use crate::error::{EpiError, EpiResult};
use crate::rates::RateModel;
use crate::traits::DynamicalSystem;
use nalgebra::DMatrix;
use nalgebra_sparse::convert::serial::convert_dense_csr;
use nalgebra_sparse::CsrMatrix;

/// Right-hand side `dx/dt = b + L x + Q(x, x)` compiled from a [`RateModel`].
///
/// The field owns sparse copies of the rate structures, so later edits to the
/// model do not affect an already compiled field. Evaluation only reads, and the
/// field is `Send + Sync`: one instance can drive integrations on several threads.
///
/// [`evaluate`](Self::evaluate) and [`jacobian`](Self::jacobian) check the state
/// length. The solver-facing [`DynamicalSystem::apply`] does not, and panics
/// unless `x` and `out` both have length [`dimension`](Self::dimension).
#[derive(Debug, Clone)]
pub struct VectorField {
    dim: usize,
    constant: Vec<f64>,
    linear: CsrMatrix<f64>,
    /// `N x N^2`; row `k` stores `Q[k][i][j]` at column `i * N + j`.
    quadratic: CsrMatrix<f64>,
}

impl VectorField {
    pub fn new(model: &RateModel) -> Self {
        Self {
            dim: model.dimension(),
            constant: model.constant_rates().iter().copied().collect(),
            linear: convert_dense_csr(model.linear_rates()),
            quadratic: model.quadratic_rates().to_csr(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of nonzero linear and quadratic coefficients.
    pub fn nnz(&self) -> usize {
        self.linear.nnz() + self.quadratic.nnz()
    }

    /// Checked evaluation returning a fresh derivative vector.
    pub fn evaluate(&self, x: &[f64]) -> EpiResult<Vec<f64>> {
        self.check_len(x)?;
        let mut out = vec![0.0; self.dim];
        self.apply(0.0, x, &mut out);
        Ok(out)
    }

    /// `J[k][m] = L[k][m] + sum_j Q[k][m][j] x_j + sum_i Q[k][i][m] x_i`.
    pub fn jacobian(&self, x: &[f64]) -> EpiResult<DMatrix<f64>> {
        self.check_len(x)?;
        let n = self.dim;
        let mut jac = DMatrix::zeros(n, n);
        for (k, row) in self.linear.row_iter().enumerate() {
            for (&m, &rate) in row.col_indices().iter().zip(row.values()) {
                jac[(k, m)] += rate;
            }
        }
        for (k, row) in self.quadratic.row_iter().enumerate() {
            for (&flat, &rate) in row.col_indices().iter().zip(row.values()) {
                let (i, j) = (flat / n, flat % n);
                jac[(k, i)] += rate * x[j];
                jac[(k, j)] += rate * x[i];
            }
        }
        Ok(jac)
    }

    fn check_len(&self, x: &[f64]) -> EpiResult<()> {
        if x.len() != self.dim {
            return Err(EpiError::shape("state vector", self.dim, x.len()));
        }
        Ok(())
    }
}

impl DynamicalSystem<f64> for VectorField {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.dim;
        out.copy_from_slice(&self.constant);
        for (k, row) in self.linear.row_iter().enumerate() {
            out[k] += row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&i, &rate)| rate * x[i])
                .sum::<f64>();
        }
        for (k, row) in self.quadratic.row_iter().enumerate() {
            out[k] += row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&flat, &rate)| rate * x[flat / n] * x[flat % n])
                .sum::<f64>();
        }
    }
}
