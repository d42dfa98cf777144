//! Weighted ridge regression for the local surrogate model.
//!
//! Features are centered by their weighted means so the intercept is not
//! penalized, then `(Xc^T W Xc + alpha I) beta = Xc^T W yc` is solved by
//! Cholesky factorization.

use crate::error::{AttributionError, AttributionResult};

/// Fitted linear model `y = intercept + coef . x`.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFit {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl RidgeFit {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept + self.coef.iter().zip(row).map(|(c, x)| c * x).sum::<f64>()
    }

    /// Weighted coefficient of determination.
    pub fn score(&self, x: &[Vec<f64>], y: &[f64], w: &[f64]) -> f64 {
        let total: f64 = w.iter().sum();
        let y_mean = weighted_mean(y.iter().copied(), w, total);
        let mut residual = 0.0;
        let mut spread = 0.0;
        for ((row, &yi), &wi) in x.iter().zip(y).zip(w) {
            residual += wi * (yi - self.predict(row)).powi(2);
            spread += wi * (yi - y_mean).powi(2);
        }
        if spread == 0.0 {
            return if residual == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - residual / spread
    }
}

/// Result of the two-stage surrogate fit.
#[derive(Debug, Clone)]
pub struct SurrogateFit {
    /// Column indices kept by feature selection, in selection order.
    pub selected: Vec<usize>,
    /// Final coefficient of every selected column, aligned with `selected`.
    pub coef: Vec<f64>,
    pub intercept: f64,
    /// Weighted R^2 of the final model on the samples.
    pub score: f64,
    /// Final model prediction for row 0.
    pub local_pred: f64,
}

fn weighted_mean(values: impl Iterator<Item = f64>, w: &[f64], total: f64) -> f64 {
    values.zip(w).map(|(v, wi)| v * wi).sum::<f64>() / total
}

/// Weighted ridge regression with an unpenalized intercept.
///
/// # Errors
/// `Tensor` if the normal equations are not positive definite (only
/// possible with zero total weight).
pub fn weighted_ridge(x: &[Vec<f64>], y: &[f64], w: &[f64], alpha: f64) -> AttributionResult<RidgeFit> {
    let p = x.first().map_or(0, Vec::len);
    let total: f64 = w.iter().sum();
    if !(total > 0.0) {
        return Err(AttributionError::Tensor {
            message: "surrogate sample weights sum to zero".to_string(),
        });
    }

    let x_mean: Vec<f64> = (0..p)
        .map(|j| weighted_mean(x.iter().map(|row| row[j]), w, total))
        .collect();
    let y_mean = weighted_mean(y.iter().copied(), w, total);

    let mut gram = vec![vec![0.0; p]; p];
    let mut rhs = vec![0.0; p];
    for ((row, &yi), &wi) in x.iter().zip(y).zip(w) {
        let centered: Vec<f64> = row.iter().zip(&x_mean).map(|(v, m)| v - m).collect();
        let yc = yi - y_mean;
        for a in 0..p {
            rhs[a] += wi * centered[a] * yc;
            for b in 0..=a {
                gram[a][b] += wi * centered[a] * centered[b];
            }
        }
    }
    for a in 0..p {
        gram[a][a] += alpha;
        for b in 0..a {
            gram[b][a] = gram[a][b];
        }
    }

    let coef = cholesky_solve(gram, rhs)?;
    let intercept = y_mean - coef.iter().zip(&x_mean).map(|(c, m)| c * m).sum::<f64>();
    Ok(RidgeFit { coef, intercept })
}

/// Solve `A z = b` for symmetric positive definite `A`.
fn cholesky_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> AttributionResult<Vec<f64>> {
    let n = b.len();
    // In-place lower factor: A = L L^T
    for j in 0..n {
        let diag = a[j][j] - (0..j).map(|k| a[j][k] * a[j][k]).sum::<f64>();
        if !(diag > 0.0) {
            return Err(AttributionError::Tensor {
                message: format!("surrogate normal equations not positive definite at column {}", j),
            });
        }
        a[j][j] = diag.sqrt();
        for i in j + 1..n {
            let dot = (0..j).map(|k| a[i][k] * a[j][k]).sum::<f64>();
            a[i][j] = (a[i][j] - dot) / a[j][j];
        }
    }
    // L y = b
    for i in 0..n {
        let dot = (0..i).map(|k| a[i][k] * b[k]).sum::<f64>();
        b[i] = (b[i] - dot) / a[i][i];
    }
    // L^T z = y
    for i in (0..n).rev() {
        let dot = (i + 1..n).map(|k| a[k][i] * b[k]).sum::<f64>();
        b[i] = (b[i] - dot) / a[i][i];
    }
    Ok(b)
}

/// Indices of the `num_features` columns with the largest `|coef * x[0]|`
/// under a weighted ridge fit with penalty `alpha`.
pub fn select_highest_weights(
    x: &[Vec<f64>],
    y: &[f64],
    w: &[f64],
    num_features: usize,
    alpha: f64,
) -> AttributionResult<Vec<usize>> {
    let fit = weighted_ridge(x, y, w, alpha)?;
    let first = x.first().map(Vec::as_slice).unwrap_or_default();
    let mut scored: Vec<(usize, f64)> = fit
        .coef
        .iter()
        .zip(first)
        .map(|(c, v)| (c * v).abs())
        .enumerate()
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored
        .into_iter()
        .take(num_features)
        .map(|(i, _)| i)
        .collect())
}

/// Feature selection followed by the final weighted ridge fit.
pub fn fit_surrogate(
    x: &[Vec<f64>],
    y: &[f64],
    w: &[f64],
    num_features: usize,
    selection_alpha: f64,
    ridge_alpha: f64,
) -> AttributionResult<SurrogateFit> {
    let selected = select_highest_weights(x, y, w, num_features, selection_alpha)?;
    let reduced: Vec<Vec<f64>> = x
        .iter()
        .map(|row| selected.iter().map(|&j| row[j]).collect())
        .collect();

    let fit = weighted_ridge(&reduced, y, w, ridge_alpha)?;
    let score = fit.score(&reduced, y, w);
    let local_pred = reduced.first().map_or(fit.intercept, |row| fit.predict(row));

    Ok(SurrogateFit {
        selected,
        coef: fit.coef,
        intercept: fit.intercept,
        score,
        local_pred,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "expected {} ~ {}", a, b);
    }

    #[test]
    fn test_cholesky_solves_spd_system() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let z = cholesky_solve(a, vec![2.0, 1.0]).unwrap();
        // 4z0 + 2z1 = 2, 2z0 + 3z1 = 1
        assert_close(z[0], 0.5, 1e-12);
        assert_close(z[1], 0.0, 1e-12);
    }

    #[test]
    fn test_ridge_recovers_linear_relation_with_small_alpha() {
        // y = 0.2 + 0.5 x0 - 0.3 x1
        let x = vec![
            vec![1.0, 1.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
        ];
        let y: Vec<f64> = x.iter().map(|r| 0.2 + 0.5 * r[0] - 0.3 * r[1]).collect();
        let w = vec![1.0, 0.5, 0.5, 0.25, 1.0];
        let fit = weighted_ridge(&x, &y, &w, 1e-9).unwrap();
        assert_close(fit.coef[0], 0.5, 1e-6);
        assert_close(fit.coef[1], -0.3, 1e-6);
        assert_close(fit.intercept, 0.2, 1e-6);
        assert_close(fit.score(&x, &y, &w), 1.0, 1e-9);
    }

    #[test]
    fn test_ridge_penalty_shrinks_coefficients() {
        let x = vec![vec![1.0], vec![0.0], vec![1.0], vec![0.0]];
        let y = vec![1.0, 0.0, 1.0, 0.0];
        let w = vec![1.0; 4];
        let loose = weighted_ridge(&x, &y, &w, 1e-6).unwrap();
        let tight = weighted_ridge(&x, &y, &w, 1.0).unwrap();
        assert!(tight.coef[0].abs() < loose.coef[0].abs());
        // centered x: +-0.5, sum w x^2 = 1, sum w x y = 1 -> coef = 1 / (1 + alpha)
        assert_close(tight.coef[0], 0.5, 1e-12);
    }

    #[test]
    fn test_zero_weights_rejected() {
        let result = weighted_ridge(&[vec![1.0]], &[1.0], &[0.0], 1.0);
        assert!(matches!(result, Err(AttributionError::Tensor { .. })));
    }

    #[test]
    fn test_selection_keeps_strongest_columns() {
        // only column 1 drives y
        let x = vec![
            vec![1.0, 1.0, 1.0],
            vec![1.0, 0.0, 1.0],
            vec![0.0, 1.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ];
        let y: Vec<f64> = x.iter().map(|r| 0.9 * r[1]).collect();
        let w = vec![1.0; 6];
        let selected = select_highest_weights(&x, &y, &w, 1, 0.01).unwrap();
        assert_eq!(selected, vec![1]);

        let fit = fit_surrogate(&x, &y, &w, 1, 0.01, 1.0).unwrap();
        assert_eq!(fit.selected, vec![1]);
        assert_eq!(fit.coef.len(), 1);
        assert!(fit.coef[0] > 0.0);
        assert!(fit.score > 0.5);
    }
}
