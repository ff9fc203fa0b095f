use serde::{Deserialize, Serialize};

/// Hold-out accuracy of a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Mean absolute error, MW.
    pub mae: f64,
    /// Root mean squared error, MW.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
    /// Mean absolute percentage error over non-zero actuals.
    pub mape: Option<f64>,
    /// Rows evaluated.
    pub samples: usize,
}

/// Scores `predicted` against `actual`. Extra elements of the longer slice are ignored.
///
/// When the actuals have no spread, R² is 1 for a perfect fit and 0 otherwise.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(actual: &[f64], predicted: &[f64]) -> EvaluationMetrics {
    let samples = actual.len().min(predicted.len());
    if samples == 0 {
        return EvaluationMetrics {
            mae: 0.0,
            rmse: 0.0,
            r2: 0.0,
            mape: None,
            samples,
        };
    }
    let actual = &actual[..samples];
    let predicted = &predicted[..samples];
    let n = samples as f64;

    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut pct_sum = 0.0;
    let mut pct_count = 0_usize;
    for (a, p) in actual.iter().zip(predicted) {
        let err = a - p;
        abs_sum += err.abs();
        sq_sum += err * err;
        if *a != 0.0 {
            pct_sum += (err / a).abs();
            pct_count += 1;
        }
    }

    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - sq_sum / ss_tot
    } else if sq_sum <= f64::EPSILON * n {
        1.0
    } else {
        0.0
    };

    EvaluationMetrics {
        mae: abs_sum / n,
        rmse: (sq_sum / n).sqrt(),
        r2,
        mape: (pct_count > 0).then(|| 100.0 * pct_sum / pct_count as f64),
        samples,
    }
}
