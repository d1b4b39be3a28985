//! Single-layer LSTM regressor trained with backpropagation through time.
//!
//! The network reads a window step by step (`lag` steps of `step_width`
//! features) and maps the final hidden state to one scaled load value.
//!
//! ```text
//! z_t = W x_t + U h_{t-1} + b            (4H: input, forget, cell, output)
//! c_t = f_t * c_{t-1} + i_t * g_t
//! h_t = o_t * tanh(c_t)
//! y   = w_out . h_T + b_out
//! ```
//!
//! Inputs are standardized per feature and the target is z-scored; both
//! scalers are fitted on the training windows only. Weights start uniform in
//! `±1/sqrt(H)` with the forget-gate bias at 1, drawn from a seeded `StdRng`,
//! and are updated with Adam over shuffled mini-batches. Training with the
//! same seed and data is bit-for-bit reproducible.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Uniform};
use tracing::{debug, info};

use crate::domain::{LstmConfig, SupervisedWindow};
use crate::error::ForecastError;
use crate::math::{Standardizer, TargetScaler};
use crate::models::model::{prediction_row, training_set, Forecaster, TrainingSummary, WindowShape};

const GRAD_CLIP: f64 = 5.0;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

#[derive(Debug, Clone)]
struct LstmParams {
    w: DMatrix<f64>,
    u: DMatrix<f64>,
    b: DVector<f64>,
    w_out: DVector<f64>,
    b_out: DVector<f64>,
}

impl LstmParams {
    fn zeros(input: usize, hidden: usize) -> Self {
        Self {
            w: DMatrix::zeros(4 * hidden, input),
            u: DMatrix::zeros(4 * hidden, hidden),
            b: DVector::zeros(4 * hidden),
            w_out: DVector::zeros(hidden),
            b_out: DVector::zeros(1),
        }
    }

    fn init(input: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden as f64).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let mut p = Self::zeros(input, hidden);
        for v in p.w.iter_mut().chain(p.u.iter_mut()).chain(p.w_out.iter_mut()) {
            *v = dist.sample(rng);
        }
        p.b.rows_mut(hidden, hidden).fill(1.0);
        p
    }

    fn hidden(&self) -> usize {
        self.u.ncols()
    }

    fn slices(&self) -> [&[f64]; 5] {
        [
            self.w.as_slice(),
            self.u.as_slice(),
            self.b.as_slice(),
            self.w_out.as_slice(),
            self.b_out.as_slice(),
        ]
    }

    fn slices_mut(&mut self) -> [&mut [f64]; 5] {
        [
            self.w.as_mut_slice(),
            self.u.as_mut_slice(),
            self.b.as_mut_slice(),
            self.w_out.as_mut_slice(),
            self.b_out.as_mut_slice(),
        ]
    }

    fn scale(&mut self, factor: f64) {
        for s in self.slices_mut() {
            s.iter_mut().for_each(|v| *v *= factor);
        }
    }

    fn norm(&self) -> f64 {
        self.slices().iter().flat_map(|s| s.iter()).map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Activations kept from the forward pass for BPTT.
struct StepCache {
    x: DVector<f64>,
    h_prev: DVector<f64>,
    c_prev: DVector<f64>,
    i: DVector<f64>,
    f: DVector<f64>,
    g: DVector<f64>,
    o: DVector<f64>,
    tanh_c: DVector<f64>,
}

fn forward(p: &LstmParams, seq: &[DVector<f64>]) -> (f64, Vec<StepCache>) {
    let h_size = p.hidden();
    let mut h = DVector::zeros(h_size);
    let mut c = DVector::zeros(h_size);
    let mut caches = Vec::with_capacity(seq.len());

    for x in seq {
        let z = &p.w * x + &p.u * &h + &p.b;
        let i = z.rows(0, h_size).map(sigmoid);
        let f = z.rows(h_size, h_size).map(sigmoid);
        let g = z.rows(2 * h_size, h_size).map(f64::tanh);
        let o = z.rows(3 * h_size, h_size).map(sigmoid);

        let c_next = f.component_mul(&c) + i.component_mul(&g);
        let tanh_c = c_next.map(f64::tanh);
        let h_next = o.component_mul(&tanh_c);

        caches.push(StepCache {
            x: x.clone(),
            h_prev: h,
            c_prev: c,
            i,
            f,
            g,
            o,
            tanh_c,
        });
        h = h_next;
        c = c_next;
    }

    (p.w_out.dot(&h) + p.b_out[0], caches)
}

/// Accumulate gradients of `0.5 * weight * (y - target)^2` into `grads`.
fn backward(p: &LstmParams, caches: &[StepCache], dy: f64, grads: &mut LstmParams) {
    let h_size = p.hidden();
    let Some(last) = caches.last() else {
        return;
    };
    let h_last = last.o.component_mul(&last.tanh_c);
    grads.w_out.axpy(dy, &h_last, 1.0);
    grads.b_out[0] += dy;

    let mut dh = &p.w_out * dy;
    let mut dc = DVector::zeros(h_size);

    for step in caches.iter().rev() {
        let d_o = dh.component_mul(&step.tanh_c);
        dc += dh
            .component_mul(&step.o)
            .component_mul(&step.tanh_c.map(|t| 1.0 - t * t));

        let d_i = dc.component_mul(&step.g);
        let d_g = dc.component_mul(&step.i);
        let d_f = dc.component_mul(&step.c_prev);

        let mut dz = DVector::zeros(4 * h_size);
        dz.rows_mut(0, h_size)
            .copy_from(&d_i.component_mul(&step.i.map(|v| v * (1.0 - v))));
        dz.rows_mut(h_size, h_size)
            .copy_from(&d_f.component_mul(&step.f.map(|v| v * (1.0 - v))));
        dz.rows_mut(2 * h_size, h_size)
            .copy_from(&d_g.component_mul(&step.g.map(|v| 1.0 - v * v)));
        dz.rows_mut(3 * h_size, h_size)
            .copy_from(&d_o.component_mul(&step.o.map(|v| v * (1.0 - v))));

        grads.w += &dz * step.x.transpose();
        grads.u += &dz * step.h_prev.transpose();
        grads.b += &dz;

        dh = p.u.tr_mul(&dz);
        dc = dc.component_mul(&step.f);
    }
}

struct Adam {
    m: LstmParams,
    v: LstmParams,
    t: i32,
    lr: f64,
}

impl Adam {
    fn new(input: usize, hidden: usize, lr: f64) -> Self {
        Self {
            m: LstmParams::zeros(input, hidden),
            v: LstmParams::zeros(input, hidden),
            t: 0,
            lr,
        }
    }

    fn step(&mut self, params: &mut LstmParams, grads: &LstmParams) {
        self.t += 1;
        let bc1 = 1.0 - ADAM_BETA1.powi(self.t);
        let bc2 = 1.0 - ADAM_BETA2.powi(self.t);

        for (((p, g), m), v) in params
            .slices_mut()
            .into_iter()
            .zip(grads.slices())
            .zip(self.m.slices_mut())
            .zip(self.v.slices_mut())
        {
            for k in 0..p.len() {
                m[k] = ADAM_BETA1 * m[k] + (1.0 - ADAM_BETA1) * g[k];
                v[k] = ADAM_BETA2 * v[k] + (1.0 - ADAM_BETA2) * g[k] * g[k];
                let m_hat = m[k] / bc1;
                let v_hat = v[k] / bc2;
                p[k] -= self.lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct FittedLstm {
    params: LstmParams,
    inputs: Standardizer,
    target: TargetScaler,
    shape: WindowShape,
}

impl FittedLstm {
    fn encode(&self, steps: &[Vec<f64>]) -> Vec<DVector<f64>> {
        steps
            .iter()
            .map(|s| DVector::from_vec(self.inputs.transform(s)))
            .collect()
    }

    fn predict_steps(&self, steps: &[Vec<f64>]) -> f64 {
        let (y, _) = forward(&self.params, &self.encode(steps));
        self.target.inverse(y)
    }
}

/// LSTM load forecaster.
#[derive(Debug, Clone)]
pub struct LstmForecaster {
    config: LstmConfig,
    fitted: Option<FittedLstm>,
    loss_history: Vec<f64>,
}

impl LstmForecaster {
    pub const NAME: &'static str = "LSTM";

    pub fn new(config: LstmConfig) -> Self {
        Self {
            config,
            fitted: None,
            loss_history: Vec::new(),
        }
    }

    /// Mean scaled training loss per epoch of the last `train` call.
    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }
}

impl Forecaster for LstmForecaster {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError> {
        self.config
            .validate()
            .map_err(|e| ForecastError::training(Self::NAME, e.to_string()))?;
        let set = training_set(Self::NAME, windows)?;

        let step_rows: Vec<Vec<f64>> = windows.iter().flat_map(|w| w.steps.iter().cloned()).collect();
        let inputs = Standardizer::fit(&step_rows)
            .ok_or_else(|| ForecastError::training(Self::NAME, "no input steps"))?;
        let target = TargetScaler::fit(&set.targets)
            .ok_or_else(|| ForecastError::training(Self::NAME, "no targets"))?;

        let sequences: Vec<Vec<DVector<f64>>> = windows
            .iter()
            .map(|w| {
                w.steps
                    .iter()
                    .map(|s| DVector::from_vec(inputs.transform(s)))
                    .collect()
            })
            .collect();
        let scaled: Vec<f64> = set.targets.iter().map(|&t| target.transform(t)).collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let hidden = self.config.hidden_size;
        let mut params = LstmParams::init(set.step_width, hidden, &mut rng);
        let mut adam = Adam::new(set.step_width, hidden, self.config.learning_rate);
        let mut order: Vec<usize> = (0..sequences.len()).collect();
        let mut history = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(self.config.batch_size) {
                let mut grads = LstmParams::zeros(set.step_width, hidden);
                let weight = 1.0 / batch.len() as f64;
                for &k in batch {
                    let (y, caches) = forward(&params, &sequences[k]);
                    let err = y - scaled[k];
                    epoch_loss += 0.5 * err * err;
                    backward(&params, &caches, err * weight, &mut grads);
                }

                let norm = grads.norm();
                if !norm.is_finite() {
                    return Err(ForecastError::training(
                        Self::NAME,
                        format!("non-finite gradient in epoch {}", epoch + 1),
                    ));
                }
                if norm > GRAD_CLIP {
                    grads.scale(GRAD_CLIP / norm);
                }
                adam.step(&mut params, &grads);
            }

            let avg_loss = epoch_loss / sequences.len() as f64;
            debug!(epoch = epoch + 1, epochs = self.config.epochs, loss = avg_loss, "lstm epoch");
            history.push(avg_loss);
        }

        let fitted = FittedLstm {
            params,
            inputs,
            target,
            shape: set.shape(),
        };
        let train_mse = windows
            .iter()
            .zip(&set.targets)
            .map(|(w, t)| (fitted.predict_steps(&w.steps) - t).powi(2))
            .sum::<f64>()
            / windows.len() as f64;
        if !train_mse.is_finite() {
            return Err(ForecastError::training(Self::NAME, "training diverged"));
        }

        info!(
            windows = windows.len(),
            epochs = self.config.epochs,
            final_loss = history.last().copied().unwrap_or(f64::NAN),
            "lstm trained"
        );
        self.fitted = Some(fitted);
        self.loss_history = history;
        Ok(TrainingSummary {
            windows: windows.len(),
            train_mse,
        })
    }

    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError> {
        let fitted = self.fitted.as_ref().ok_or_else(|| ForecastError::UntrainedModel {
            model: Self::NAME.to_string(),
        })?;
        prediction_row(window, fitted.shape)?;
        Ok(fitted.predict_steps(&window.steps))
    }

    fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seasonal_windows(lag: usize) -> Vec<SupervisedWindow> {
        let series: Vec<f64> = (0..80)
            .map(|t| 100.0 + 20.0 * ((t % 7) as f64) + if t % 7 == 4 { 30.0 } else { 0.0 })
            .collect();
        (0..series.len() - lag)
            .map(|start| SupervisedWindow {
                atm: "A".to_string(),
                start,
                steps: series[start..start + lag].iter().map(|&v| vec![v]).collect(),
                loads: series[start..start + lag].to_vec(),
                target: Some(series[start + lag]),
                horizon: 1,
            })
            .collect()
    }

    fn small_config(seed: u64) -> LstmConfig {
        LstmConfig {
            hidden_size: 8,
            epochs: 25,
            learning_rate: 0.02,
            batch_size: 8,
            seed,
            ..LstmConfig::default()
        }
    }

    #[test]
    fn same_seed_gives_identical_forecasts() {
        let windows = seasonal_windows(7);
        let mut a = LstmForecaster::new(small_config(3));
        let mut b = LstmForecaster::new(small_config(3));
        a.train(&windows).unwrap();
        b.train(&windows).unwrap();
        assert_eq!(a.loss_history(), b.loss_history());
        assert_eq!(a.predict(&windows[5]).unwrap(), b.predict(&windows[5]).unwrap());
    }

    #[test]
    fn training_reduces_loss() {
        let windows = seasonal_windows(7);
        let mut model = LstmForecaster::new(small_config(11));
        let summary = model.train(&windows).unwrap();
        let history = model.loss_history();
        assert_eq!(history.len(), 25);
        assert!(history[history.len() - 1] < history[0]);
        assert!(summary.train_mse.is_finite());
    }

    #[test]
    fn untrained_and_empty_inputs_fail() {
        let mut model = LstmForecaster::new(small_config(1));
        let windows = seasonal_windows(3);
        assert!(matches!(
            model.predict(&windows[0]).unwrap_err(),
            ForecastError::UntrainedModel { .. }
        ));
        assert!(matches!(model.train(&[]).unwrap_err(), ForecastError::Training { .. }));
    }

    #[test]
    fn lag_mismatch_is_rejected() {
        let mut model = LstmForecaster::new(small_config(1));
        model.train(&seasonal_windows(5)).unwrap();
        let other = seasonal_windows(3);
        assert_eq!(
            model.predict(&other[0]).unwrap_err(),
            ForecastError::DimensionMismatch { expected: 5, actual: 3 }
        );
    }

    #[test]
    fn transposed_window_is_a_dimension_mismatch() {
        let windows: Vec<SupervisedWindow> = seasonal_windows(6)
            .into_iter()
            .map(|w| SupervisedWindow {
                steps: w.steps.chunks(3).map(|c| c.iter().map(|s| s[0]).collect()).collect(),
                loads: w.loads[3..].to_vec(),
                ..w
            })
            .collect();
        assert_eq!((windows[0].lag(), windows[0].step_width()), (2, 3));

        let mut model = LstmForecaster::new(small_config(2));
        model.train(&windows).unwrap();

        let transposed = SupervisedWindow {
            steps: vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
            loads: vec![2.0, 4.0, 6.0],
            ..windows[0].clone()
        };
        assert_eq!(
            model.predict(&transposed).unwrap_err(),
            ForecastError::DimensionMismatch { expected: 2, actual: 3 }
        );
        assert!(model.predict(&windows[0]).unwrap().is_finite());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let p = LstmParams::init(2, 3, &mut rng);
        let seq = vec![
            DVector::from_vec(vec![0.3, -0.1]),
            DVector::from_vec(vec![-0.7, 0.5]),
            DVector::from_vec(vec![0.2, 0.9]),
        ];
        let target = 0.4;
        let loss = |p: &LstmParams| {
            let (y, _) = forward(p, &seq);
            0.5 * (y - target).powi(2)
        };

        let (y, caches) = forward(&p, &seq);
        let mut grads = LstmParams::zeros(2, 3);
        backward(&p, &caches, y - target, &mut grads);

        let eps = 1e-6;
        for (r, c) in [(0, 0), (4, 1), (7, 0), (11, 1)] {
            let mut plus = p.clone();
            plus.w[(r, c)] += eps;
            let mut minus = p.clone();
            minus.w[(r, c)] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - grads.w[(r, c)]).abs() < 1e-6, "w[{r},{c}]");
        }
        for (r, c) in [(1, 2), (9, 0)] {
            let mut plus = p.clone();
            plus.u[(r, c)] += eps;
            let mut minus = p.clone();
            minus.u[(r, c)] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - grads.u[(r, c)]).abs() < 1e-6, "u[{r},{c}]");
        }
    }
}
