use crate::error::{EpiError, EpiResult};
use crate::field::VectorField;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Eigenvalues of the Jacobian of `field` at `state`, ordered by decreasing real part.
pub fn jacobian_spectrum(field: &VectorField, state: &[f64]) -> EpiResult<Vec<ComplexNumber>> {
    let jacobian = field.jacobian(state)?;
    if jacobian.iter().any(|v| !v.is_finite()) {
        return Err(EpiError::invalid("Jacobian contains non-finite entries"));
    }
    let mut values: Vec<ComplexNumber> = jacobian
        .complex_eigenvalues()
        .iter()
        .map(|&lambda| ComplexNumber::from(lambda))
        .collect();
    values.sort_by(|a, b| b.re.total_cmp(&a.re).then(b.im.total_cmp(&a.im)));
    Ok(values)
}

/// Eigenvalue with the largest real part: the local exponential growth rate of
/// small perturbations around `state` (e.g. the initial epidemic growth rate at
/// the disease-free state).
pub fn leading_eigenvalue(field: &VectorField, state: &[f64]) -> EpiResult<ComplexNumber> {
    jacobian_spectrum(field, state)?
        .into_iter()
        .next()
        .ok_or_else(|| EpiError::invalid("model has no compartments"))
}
