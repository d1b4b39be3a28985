//! Z-score feature scaling fitted on training rows only.

use serde::{Deserialize, Serialize};

/// Column-wise standardizer: `(x - mean) / std`.
///
/// Constant columns get a unit scale so they map to zero instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    /// Fit on rows of equal width. Returns `None` for an empty input.
    pub fn fit(rows: &[Vec<f64>]) -> Option<Self> {
        let first = rows.first()?;
        let width = first.len();
        let n = rows.len() as f64;

        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scales {
            let sd = (*s / n).sqrt();
            *s = if sd > 1e-12 { sd } else { 1.0 };
        }

        Some(Self { means, scales })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Scalar standardizer for regression targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetScaler {
    mean: f64,
    scale: f64,
}

impl TargetScaler {
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        Some(Self {
            mean,
            scale: if sd > 1e-12 { sd } else { 1.0 },
        })
    }

    pub fn transform(&self, v: f64) -> f64 {
        (v - self.mean) / self.scale
    }

    pub fn inverse(&self, v: f64) -> f64 {
        v * self.scale + self.mean
    }
}
