use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ForecastError, ForecastResult};

/// Diagonal ridge added to the normal equations.
pub const RIDGE: f64 = 1e-8;

/// Fitted linear coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    /// One weight per input column.
    pub weights: Vec<f64>,
    /// Constant term.
    pub intercept: f64,
}

impl LinearFit {
    /// Evaluates the fit on one row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        row.dot(&ArrayView1::from(&self.weights[..])) + self.intercept
    }
}

/// Least squares `y = intercept + x · w` via the normal equations.
///
/// The design matrix gains a leading column of ones; a tiny ridge keeps the
/// Gram matrix positive definite when a column is constant.
pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> ForecastResult<LinearFit> {
    let (rows, cols) = x.dim();
    if rows == 0 || rows != y.len() {
        return Err(ForecastError::Training(format!(
            "design matrix has {rows} rows for {} targets",
            y.len()
        )));
    }

    let mut design = Array2::<f64>::ones((rows, cols + 1));
    design.slice_mut(s![.., 1..]).assign(&x);
    let mut gram = design.t().dot(&design);
    gram.diag_mut().mapv_inplace(|value| value + RIDGE);
    let moment = design.t().dot(&y);

    let beta = solve_symmetric(&gram, &moment).ok_or_else(|| {
        ForecastError::Training("normal equations are not positive definite".into())
    })?;
    if beta.iter().any(|value| !value.is_finite()) {
        return Err(ForecastError::Training("non-finite coefficients".into()));
    }
    Ok(LinearFit {
        intercept: beta[0],
        weights: beta.slice(s![1..]).to_vec(),
    })
}

/// Cholesky solve of `a · x = b` for symmetric positive definite `a`.
fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    if n == 0 || a.dim() != (n, n) {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let partial = l.row(i).slice(s![..j]).dot(&l.row(j).slice(s![..j]));
            let sum = a[[i, j]] - partial;
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut forward = Array1::<f64>::zeros(n);
    for i in 0..n {
        let partial = l.row(i).slice(s![..i]).dot(&forward.slice(s![..i]));
        forward[i] = (b[i] - partial) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let partial = l
            .index_axis(Axis(1), i)
            .slice(s![i + 1..])
            .dot(&x.slice(s![i + 1..]));
        x[i] = (forward[i] - partial) / l[[i, i]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn recovers_exact_linear_relationship() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 5.0], [4.0, 2.0]];
        let y: Array1<f64> = x
            .rows()
            .into_iter()
            .map(|row| 3.0 + 2.0 * row[0] - 0.5 * row[1])
            .collect();
        let fit = fit(x.view(), y.view()).unwrap();
        assert!((fit.intercept - 3.0).abs() < 1e-6);
        assert!((fit.weights[0] - 2.0).abs() < 1e-6);
        assert!((fit.weights[1] + 0.5).abs() < 1e-6);
        assert!((fit.predict_row(x.row(3)) - y[3]).abs() < 1e-6);
    }

    #[test]
    fn constant_column_gets_near_zero_weight() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
        let y = array![10.0, 12.0, 14.0, 16.0];
        let fit = fit(x.view(), y.view()).unwrap();
        assert!(fit.weights[1].abs() < 1e-6);
        assert!((fit.weights[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert_eq!(fit(x.view(), y.view()).unwrap_err().kind(), "TrainingError");
    }
}
