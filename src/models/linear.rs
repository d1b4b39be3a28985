//! Linear regressors on the flattened window.
//!
//! All three share the same representation: a `Standardizer` fitted on the
//! training rows, an intercept and one coefficient per flattened feature.
//! They differ only in how the coefficients are solved:
//!
//! - `LinearRegressor`: ordinary least squares (SVD)
//! - `RidgeRegressor`: L2-penalised least squares on centered data
//! - `HuberRegressor`: iteratively reweighted least squares with Huber weights

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::domain::SupervisedWindow;
use crate::error::ForecastError;
use crate::math::{
    median_mut, solve_least_squares, solve_ridge, solve_weighted_least_squares, Standardizer,
};
use crate::models::model::{prediction_row, training_set, Forecaster, TrainingSummary, WindowShape};

/// Fitted coefficients in standardized feature space.
#[derive(Debug, Clone)]
struct LinearFit {
    shape: WindowShape,
    standardizer: Standardizer,
    intercept: f64,
    coefficients: DVector<f64>,
}

impl LinearFit {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let z = self.standardizer.transform(row);
        self.intercept + z.iter().zip(self.coefficients.iter()).map(|(a, b)| a * b).sum::<f64>()
    }
}

/// Standardized design matrix, optionally with a leading intercept column.
fn design_matrix(rows: &[Vec<f64>], standardizer: &Standardizer, intercept: bool) -> DMatrix<f64> {
    let offset = usize::from(intercept);
    let width = standardizer.width() + offset;
    let mut x = DMatrix::zeros(rows.len(), width);
    for (i, row) in rows.iter().enumerate() {
        if intercept {
            x[(i, 0)] = 1.0;
        }
        for (j, v) in standardizer.transform(row).into_iter().enumerate() {
            x[(i, j + offset)] = v;
        }
    }
    x
}

fn split_intercept(beta: &DVector<f64>) -> (f64, DVector<f64>) {
    (beta[0], beta.rows(1, beta.len() - 1).into_owned())
}

fn in_sample_mse(fit: &LinearFit, rows: &[Vec<f64>], targets: &[f64]) -> f64 {
    rows.iter()
        .zip(targets)
        .map(|(row, y)| (fit.predict_row(row) - y).powi(2))
        .sum::<f64>()
        / rows.len() as f64
}

fn standardizer_for(model: &str, rows: &[Vec<f64>]) -> Result<Standardizer, ForecastError> {
    Standardizer::fit(rows).ok_or_else(|| ForecastError::training(model, "no training rows"))
}

fn predict_with(
    model: &str,
    fit: Option<&LinearFit>,
    window: &SupervisedWindow,
) -> Result<f64, ForecastError> {
    let fit = fit.ok_or_else(|| ForecastError::UntrainedModel {
        model: model.to_string(),
    })?;
    let row = prediction_row(window, fit.shape)?;
    Ok(fit.predict_row(&row))
}

/// Ordinary least squares.
#[derive(Debug, Clone, Default)]
pub struct LinearRegressor {
    fit: Option<LinearFit>,
}

impl LinearRegressor {
    pub const NAME: &'static str = "LinearRegression";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Forecaster for LinearRegressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        let set = training_set(Self::NAME, windows)?;
        let standardizer = standardizer_for(Self::NAME, &set.features)?;
        let x = design_matrix(&set.features, &standardizer, true);
        let y = DVector::from_column_slice(&set.targets);

        let beta = solve_least_squares(&x, &y)
            .ok_or_else(|| ForecastError::training(Self::NAME, "least squares solve failed"))?;
        let (intercept, coefficients) = split_intercept(&beta);
        let fit = LinearFit {
            shape: set.shape(),
            standardizer,
            intercept,
            coefficients,
        };

        let train_mse = in_sample_mse(&fit, &set.features, &set.targets);
        self.fit = Some(fit);
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        predict_with(Self::NAME, self.fit.as_ref(), window)
    }

    fn is_trained(&self) -> bool {
        self.fit.is_some()
    }
}

/// L2-penalised least squares. The intercept is not penalised.
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    alpha: f64,
    fit: Option<LinearFit>,
}

impl RidgeRegressor {
    pub const NAME: &'static str = "Ridge";

    pub fn new(alpha: f64) -> Self {
        Self { alpha, fit: None }
    }
}

impl Forecaster for RidgeRegressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        let set = training_set(Self::NAME, windows)?;
        let standardizer = standardizer_for(Self::NAME, &set.features)?;
        // Standardized columns are already centered.
        let x = design_matrix(&set.features, &standardizer, false);
        let y_mean = set.targets.iter().sum::<f64>() / set.targets.len() as f64;
        let y = DVector::from_iterator(set.targets.len(), set.targets.iter().map(|v| v - y_mean));

        let coefficients = solve_ridge(&x, &y, self.alpha)
            .ok_or_else(|| ForecastError::training(Self::NAME, "ridge solve failed"))?;
        let fit = LinearFit {
            shape: set.shape(),
            standardizer,
            intercept: y_mean,
            coefficients,
        };

        let train_mse = in_sample_mse(&fit, &set.features, &set.targets);
        self.fit = Some(fit);
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        predict_with(Self::NAME, self.fit.as_ref(), window)
    }

    fn is_trained(&self) -> bool {
        self.fit.is_some()
    }
}

/// Robust linear regression via Huber IRLS.
#[derive(Debug, Clone)]
pub struct HuberRegressor {
    k: f64,
    iterations: usize,
    fit: Option<LinearFit>,
}

impl HuberRegressor {
    pub const NAME: &'static str = "HuberRegressor";

    pub fn new(k: f64, iterations: usize) -> Self {
        Self {
            k,
            iterations,
            fit: None,
        }
    }
}

impl Forecaster for HuberRegressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        let set = training_set(Self::NAME, windows)?;
        let standardizer = standardizer_for(Self::NAME, &set.features)?;
        let x = design_matrix(&set.features, &standardizer, true);
        let y = DVector::from_column_slice(&set.targets);

        let mut beta = solve_least_squares(&x, &y)
            .ok_or_else(|| ForecastError::training(Self::NAME, "initial least squares solve failed"))?;
        let w_base = vec![1.0; set.targets.len()];

        for iter in 0..self.iterations {
            let residuals: Vec<f64> = (&y - &x * &beta).iter().copied().collect();
            let w = huber_reweight(&w_base, &residuals, self.k);
            match solve_weighted_least_squares(&x, &y, &w) {
                Some(next) => beta = next,
                None => {
                    debug!(iter, "huber reweighting stopped early: weighted solve failed");
                    break;
                }
            }
        }

        let (intercept, coefficients) = split_intercept(&beta);
        let fit = LinearFit {
            shape: set.shape(),
            standardizer,
            intercept,
            coefficients,
        };

        let train_mse = in_sample_mse(&fit, &set.features, &set.targets);
        self.fit = Some(fit);
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        predict_with(Self::NAME, self.fit.as_ref(), window)
    }

    fn is_trained(&self) -> bool {
        self.fit.is_some()
    }
}

fn huber_reweight(w_base: &[f64], residuals: &[f64], k: f64) -> Vec<f64> {
    // Residual scale via MAD keeps the cutoff independent of the load level.
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).filter(|v| v.is_finite()).collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    let scale = (mad / 0.6745).max(1e-12);
    let cutoff = k.max(1e-6) * scale;

    let min_factor = 1e-3;
    w_base
        .iter()
        .zip(residuals)
        .map(|(&w0, &r)| {
            let ar = r.abs();
            let factor = if ar <= cutoff || !ar.is_finite() { 1.0 } else { cutoff / ar };
            (w0 * factor).max(w0 * min_factor)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lag_one(x: f64, target: f64) -> SupervisedWindow {
        SupervisedWindow {
            atm: "A".to_string(),
            start: 0,
            steps: vec![vec![x]],
            loads: vec![x],
            target: Some(target),
            horizon: 1,
        }
    }

    fn line(n: usize) -> Vec<SupervisedWindow> {
        (0..n).map(|i| lag_one(i as f64, 3.0 + 2.0 * i as f64)).collect()
    }

    #[test]
    fn linear_recovers_exact_line() {
        let mut model = LinearRegressor::new();
        let summary = model.train(&line(10)).unwrap();
        assert_eq!(summary.windows, 10);
        assert!(summary.train_mse < 1e-12);

        let pred = model.predict(&lag_one(20.0, 0.0)).unwrap();
        assert!((pred - 43.0).abs() < 1e-8);
    }

    #[test]
    fn ridge_is_pulled_towards_the_mean() {
        let windows = line(10);
        let mut ols = LinearRegressor::new();
        let mut ridge = RidgeRegressor::new(10.0);
        ols.train(&windows).unwrap();
        ridge.train(&windows).unwrap();

        let far = lag_one(30.0, 0.0);
        let mean_target = 3.0 + 2.0 * 4.5;
        let p_ols = ols.predict(&far).unwrap();
        let p_ridge = ridge.predict(&far).unwrap();
        assert!(p_ridge < p_ols);
        assert!(p_ridge > mean_target);
    }

    #[test]
    fn huber_resists_a_single_outlier() {
        let mut windows = line(20);
        windows[10].target = Some(1000.0);

        let mut ols = LinearRegressor::new();
        let mut huber = HuberRegressor::new(1.35, 10);
        ols.train(&windows).unwrap();
        huber.train(&windows).unwrap();

        let query = lag_one(25.0, 0.0);
        let truth = 53.0;
        let err_ols = (ols.predict(&query).unwrap() - truth).abs();
        let err_huber = (huber.predict(&query).unwrap() - truth).abs();
        assert!(err_huber < err_ols, "huber {err_huber} vs ols {err_ols}");
    }

    #[test]
    fn constant_feature_column_is_tolerated() {
        let windows: Vec<SupervisedWindow> = (0..8)
            .map(|i| SupervisedWindow {
                atm: "A".to_string(),
                start: i,
                steps: vec![vec![0.0, i as f64]],
                loads: vec![i as f64],
                target: Some(i as f64 + 1.0),
                horizon: 1,
            })
            .collect();
        let mut model = LinearRegressor::new();
        model.train(&windows).unwrap();
        let pred = model.predict(&windows[3]).unwrap();
        assert!((pred - 4.0).abs() < 1e-8);
    }

    #[test]
    fn width_mismatch_is_reported() {
        let mut model = RidgeRegressor::new(1.0);
        model.train(&line(5)).unwrap();
        let wide = SupervisedWindow {
            atm: "A".to_string(),
            start: 0,
            steps: vec![vec![1.0], vec![2.0]],
            loads: vec![1.0, 2.0],
            target: None,
            horizon: 0,
        };
        assert_eq!(
            model.predict(&wide).unwrap_err(),
            ForecastError::DimensionMismatch { expected: 1, actual: 2 }
        );
    }

    #[test]
    fn huber_weights_downweight_large_residuals() {
        let w = huber_reweight(&[1.0; 5], &[0.1, -0.2, 0.1, 0.0, 50.0], 1.35);
        assert_eq!(w[0], 1.0);
        assert!(w[4] < 0.1);
        assert!(w[4] >= 1e-3);
    }
}
