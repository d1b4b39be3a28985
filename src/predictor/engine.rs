//! Online decision engine: one trained model per ATM.
//!
//! The set of ATM slots is fixed at construction. Each slot guards its model
//! with a `RwLock` for concurrent forecasts and a `Mutex` that serialises
//! retraining. A retrain fits a fresh model without holding the `RwLock` and
//! only takes the write lock to swap it in.

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{AtmSeries, SupervisedWindow, WindowConfig};
use crate::error::ForecastError;
use crate::models::{Forecaster, RegisteredModel, TrainingSummary};
use crate::predictor::decision::DecisionRule;
use crate::window::build_training_windows;

/// Predictor settings.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub window: WindowConfig,
    /// Algorithm instantiated for every ATM.
    pub model: RegisteredModel,
    pub rule: DecisionRule,
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        self.window.validate()?;
        self.rule.validate()
    }
}

/// Per-ATM outcome of a training pass.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub trained: BTreeMap<String, TrainingSummary>,
    pub failures: BTreeMap<String, ForecastError>,
}

/// Decisions for a batch of current-state windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DueReport {
    pub decisions: BTreeMap<String, bool>,
    /// Requested ATMs the predictor has no slot for.
    pub unknown: Vec<String>,
    /// Known ATMs whose forecast failed.
    pub failures: BTreeMap<String, ForecastError>,
}

impl DueReport {
    pub fn due_atms(&self) -> impl Iterator<Item = &str> {
        self.decisions.iter().filter(|(_, due)| **due).map(|(atm, _)| atm.as_str())
    }
}

struct Slot {
    windows: Result<Vec<SupervisedWindow>, ForecastError>,
    model: RwLock<Box<dyn Forecaster>>,
    training: Mutex<()>,
}

pub struct AtmPredictor {
    config: PredictorConfig,
    slots: BTreeMap<String, Slot>,
}

impl AtmPredictor {
    /// Create one slot per ATM in `history`.
    ///
    /// With `autotrain` every slot is trained immediately; ATMs that fail to
    /// train stay untrained and are logged.
    pub fn new(
        history: &AtmSeries,
        config: PredictorConfig,
        autotrain: bool,
    ) -> Result<Self, ForecastError> {
        config.validate()?;

        let slots = history
            .iter()
            .map(|(atm, points)| {
                let slot = Slot {
                    windows: build_training_windows(atm, points, &config.window, 1),
                    model: RwLock::new(config.model.build()),
                    training: Mutex::new(()),
                };
                (atm.to_string(), slot)
            })
            .collect();

        let predictor = Self { config, slots };
        if autotrain {
            let report = predictor.train_all();
            info!(
                trained = report.trained.len(),
                failed = report.failures.len(),
                model = predictor.config.model.name(),
                "predictor trained"
            );
        }
        Ok(predictor)
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn contains(&self, atm: &str) -> bool {
        self.slots.contains_key(atm)
    }

    pub fn atm_codes(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn is_trained(&self, atm: &str) -> bool {
        self.slots.get(atm).is_some_and(|s| s.model.read().is_trained())
    }

    fn slot(&self, atm: &str) -> Result<&Slot, ForecastError> {
        self.slots.get(atm).ok_or_else(|| ForecastError::UnknownAtm {
            atm: atm.to_string(),
        })
    }

    /// (Re)train one ATM's model on its full history.
    pub fn train_atm(&self, atm: &str) -> Result<TrainingSummary, ForecastError> {
        let slot = self.slot(atm)?;
        let _guard = slot.training.lock();

        let windows = slot.windows.as_ref().map_err(Clone::clone)?;
        let mut fresh = self.config.model.build();
        let summary = fresh.train(windows)?;
        *slot.model.write() = fresh;
        Ok(summary)
    }

    /// (Re)train every ATM in parallel. Failures are reported, not fatal.
    pub fn train_all(&self) -> TrainingReport {
        let codes: Vec<&String> = self.slots.keys().collect();
        let outcomes: Vec<(String, Result<TrainingSummary, ForecastError>)> = codes
            .par_iter()
            .map(|atm| ((*atm).clone(), self.train_atm(atm)))
            .collect();

        let mut report = TrainingReport::default();
        for (atm, outcome) in outcomes {
            match outcome {
                Ok(summary) => {
                    report.trained.insert(atm, summary);
                }
                Err(err) => {
                    warn!(atm = %atm, error = %err, "ATM model not trained");
                    report.failures.insert(atm, err);
                }
            }
        }
        report
    }

    /// Forecast the load following `current` with `atm`'s model.
    pub fn forecast(&self, atm: &str, current: &SupervisedWindow) -> Result<f64, ForecastError> {
        let slot = self.slot(atm)?;
        let model = slot.model.read();
        model.predict(current)
    }

    /// Whether `atm` is due for resupply given its current-state window.
    ///
    /// Unknown ATMs fail with `UnknownAtm` before any model is touched.
    pub fn is_atm_due(&self, atm: &str, current: &SupervisedWindow) -> Result<bool, ForecastError> {
        let forecast = self.forecast(atm, current)?;
        Ok(self.config.rule.is_due(atm, forecast, current))
    }

    /// Decide every requested ATM, splitting them into known and unknown codes.
    pub fn decide_all(&self, current: &BTreeMap<String, SupervisedWindow>) -> DueReport {
        let mut report = DueReport::default();
        for (atm, window) in current {
            if !self.contains(atm) {
                report.unknown.push(atm.clone());
                continue;
            }
            match self.is_atm_due(atm, window) {
                Ok(due) => {
                    report.decisions.insert(atm.clone(), due);
                }
                Err(err) => {
                    warn!(atm = %atm, error = %err, "no decision for ATM");
                    report.failures.insert(atm.clone(), err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassicAlgorithm, FeatureSet, ModelParams, RawObservation};
    use crate::window::build_current_window;
    use chrono::NaiveDate;

    fn history(atms: &[(&str, f64)], days: u64) -> AtmSeries {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let observations = atms.iter().flat_map(|&(atm, level)| {
            (0..days).map(move |d| RawObservation {
                atm_code: atm.to_string(),
                date: start + chrono::Days::new(d),
                value: level + 15.0 * ((d % 7) as f64),
                holiday: None,
            })
        });
        AtmSeries::from_observations(observations)
    }

    fn config(rule: DecisionRule) -> PredictorConfig {
        PredictorConfig {
            window: WindowConfig::new(3, FeatureSet::value_only()),
            model: RegisteredModel::classic(ClassicAlgorithm::Linear, &ModelParams::default()),
            rule,
        }
    }

    fn current(series: &AtmSeries, atm: &str, window: &WindowConfig) -> SupervisedWindow {
        build_current_window(atm, series.get(atm).unwrap(), window).unwrap()
    }

    #[test]
    fn autotrained_predictor_knows_only_its_atms() {
        let series = history(&[("A", 100.0), ("B", 250.0)], 40);
        let cfg = config(DecisionRule::default());
        let predictor = AtmPredictor::new(&series, cfg.clone(), true).unwrap();

        let query = current(&series, "A", &cfg.window);
        assert_eq!(
            predictor.is_atm_due("C", &query).unwrap_err(),
            ForecastError::UnknownAtm { atm: "C".to_string() }
        );
        for atm in ["A", "B"] {
            let window = current(&series, atm, &cfg.window);
            assert!(predictor.is_atm_due(atm, &window).is_ok());
        }
    }

    #[test]
    fn decisions_are_pure() {
        let series = history(&[("A", 100.0)], 30);
        let cfg = config(DecisionRule::RecentMeanRatio { ratio: 1.0 });
        let predictor = AtmPredictor::new(&series, cfg.clone(), true).unwrap();
        let window = current(&series, "A", &cfg.window);

        let first = predictor.is_atm_due("A", &window).unwrap();
        for _ in 0..5 {
            assert_eq!(predictor.is_atm_due("A", &window).unwrap(), first);
        }
        assert_eq!(
            predictor.forecast("A", &window).unwrap(),
            predictor.forecast("A", &window).unwrap()
        );
    }

    #[test]
    fn without_autotrain_models_are_untrained_until_trained() {
        let series = history(&[("A", 100.0)], 30);
        let cfg = config(DecisionRule::Threshold { min_load: 0.0 });
        let predictor = AtmPredictor::new(&series, cfg.clone(), false).unwrap();
        let window = current(&series, "A", &cfg.window);

        assert!(!predictor.is_trained("A"));
        assert!(matches!(
            predictor.is_atm_due("A", &window).unwrap_err(),
            ForecastError::UntrainedModel { .. }
        ));

        let report = predictor.train_all();
        assert_eq!(report.trained.len(), 1);
        assert!(predictor.is_atm_due("A", &window).unwrap());
    }

    #[test]
    fn threshold_extremes_decide_every_atm() {
        let series = history(&[("A", 100.0), ("B", 250.0)], 40);
        let cfg = config(DecisionRule::Threshold { min_load: 1e12 });
        let predictor = AtmPredictor::new(&series, cfg.clone(), true).unwrap();

        let mut requested = BTreeMap::new();
        for atm in ["A", "B"] {
            requested.insert(atm.to_string(), current(&series, atm, &cfg.window));
        }
        let mut stray = current(&series, "A", &cfg.window);
        stray.atm = "Z".to_string();
        requested.insert("Z".to_string(), stray);

        let report = predictor.decide_all(&requested);
        assert_eq!(report.unknown, vec!["Z".to_string()]);
        assert_eq!(report.decisions.len(), 2);
        assert_eq!(report.due_atms().count(), 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn short_history_is_reported_as_a_training_failure() {
        let series = history(&[("A", 100.0), ("S", 100.0)], 30);
        let mut short = series.clone();
        short.insert("S", series.get("S").unwrap()[..2].to_vec());

        let predictor = AtmPredictor::new(&short, config(DecisionRule::default()), false).unwrap();
        let report = predictor.train_all();
        assert!(report.trained.contains_key("A"));
        assert!(matches!(report.failures["S"], ForecastError::InsufficientData { .. }));
        assert!(predictor.contains("S"));
    }

    #[test]
    fn retraining_while_reading_never_exposes_an_untrained_model() {
        let series = history(&[("A", 100.0)], 40);
        let cfg = config(DecisionRule::default());
        let predictor = AtmPredictor::new(&series, cfg.clone(), true).unwrap();
        let window = current(&series, "A", &cfg.window);

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20 {
                    predictor.train_atm("A").unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    assert!(predictor.forecast("A", &window).is_ok());
                }
            });
        });
    }

    #[test]
    fn capacity_decision_uses_the_requested_atm() {
        let series = history(&[("A", 100.0), ("B", 100.0)], 30);
        let flat = AtmSeries::from_observations(series.iter().flat_map(|(atm, points)| {
            points.iter().map(move |p| RawObservation {
                atm_code: atm.to_string(),
                date: p.date.unwrap(),
                value: 100.0,
                holiday: None,
            })
        }));
        let cfg = config(DecisionRule::CapacityFraction {
            default_capacity: 1000.0,
            fraction: 0.5,
            capacities: BTreeMap::from([("B".to_string(), 150.0)]),
        });
        let predictor = AtmPredictor::new(&flat, cfg.clone(), true).unwrap();

        let mut window = current(&flat, "B", &cfg.window);
        window.atm = "A".to_string();
        assert!((predictor.forecast("B", &window).unwrap() - 100.0).abs() < 1e-6);
        assert!(predictor.is_atm_due("B", &window).unwrap());
        assert!(!predictor.is_atm_due("A", &window).unwrap());

        let requested = BTreeMap::from([("B".to_string(), window)]);
        assert!(predictor.decide_all(&requested).decisions["B"]);
    }

    #[test]
    fn invalid_rule_fails_construction() {
        let series = history(&[("A", 100.0)], 10);
        let err = AtmPredictor::new(&series, config(DecisionRule::RecentMeanRatio { ratio: -1.0 }), true)
            .err()
            .unwrap();
        assert!(matches!(err, ForecastError::InvalidConfig(_)));
    }
}
