//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during windowing, training and evaluation
//! - exported to CSV/JSON
//! - received from a raw data source

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A single model input column derived from a `TimeSeriesPoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Feature {
    DayOfWeek,
    DayOfMonth,
    Month,
    Workday,
    Holiday,
    Value,
}

impl Feature {
    /// Column name used by the current-state CSV and exports.
    pub fn column(self) -> &'static str {
        match self {
            Feature::DayOfWeek => "day_of_week",
            Feature::DayOfMonth => "day_of_month",
            Feature::Month => "month",
            Feature::Workday => "workday",
            Feature::Holiday => "holiday",
            Feature::Value => "value",
        }
    }
}

/// Ordered list of features encoded for every step of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet(Vec<Feature>);

impl FeatureSet {
    pub const ALL: [Feature; 6] = [
        Feature::DayOfWeek,
        Feature::DayOfMonth,
        Feature::Month,
        Feature::Workday,
        Feature::Holiday,
        Feature::Value,
    ];

    pub fn new(features: Vec<Feature>) -> Self {
        Self(features)
    }

    /// Only the observed load, i.e. a pure autoregressive window.
    pub fn value_only() -> Self {
        Self(vec![Feature::Value])
    }

    pub fn features(&self) -> &[Feature] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self, point: &TimeSeriesPoint) -> Vec<f64> {
        self.0.iter().map(|&f| point.feature(f)).collect()
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self(Self::ALL.to_vec())
    }
}

/// One observation of an ATM's withdrawal load with its calendar features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Observation date; absent for current-state rows that only carry
    /// the derived calendar columns.
    pub date: Option<NaiveDate>,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub workday: bool,
    pub holiday: bool,
    /// Observed withdrawal load.
    pub value: f64,
}

impl TimeSeriesPoint {
    /// Derive calendar features from a date.
    ///
    /// A workday is Monday..Friday and not a holiday.
    pub fn from_date(date: NaiveDate, value: f64, holiday: bool) -> Self {
        let weekday = date.weekday();
        let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        Self {
            date: Some(date),
            day_of_week: weekday.num_days_from_monday(),
            day_of_month: date.day(),
            month: date.month(),
            workday: !weekend && !holiday,
            holiday,
            value,
        }
    }

    pub fn feature(&self, feature: Feature) -> f64 {
        match feature {
            Feature::DayOfWeek => self.day_of_week as f64,
            Feature::DayOfMonth => self.day_of_month as f64,
            Feature::Month => self.month as f64,
            Feature::Workday => flag(self.workday),
            Feature::Holiday => flag(self.holiday),
            Feature::Value => self.value,
        }
    }
}

fn flag(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}

/// A raw `(atm, date, load)` observation as supplied by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub atm_code: String,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub holiday: Option<bool>,
}

/// ATM code -> chronologically sorted series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtmSeries {
    series: BTreeMap<String, Vec<TimeSeriesPoint>>,
}

impl AtmSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build series from raw observations.
    ///
    /// Same-day observations of one ATM are summed into one daily load; a day
    /// is a holiday if any of its observations says so.
    pub fn from_observations(observations: impl IntoIterator<Item = RawObservation>) -> Self {
        let mut daily: BTreeMap<String, BTreeMap<NaiveDate, (f64, bool)>> = BTreeMap::new();
        for obs in observations {
            let entry = daily
                .entry(obs.atm_code)
                .or_default()
                .entry(obs.date)
                .or_insert((0.0, false));
            entry.0 += obs.value;
            entry.1 |= obs.holiday.unwrap_or(false);
        }

        let series = daily
            .into_iter()
            .map(|(atm, days)| {
                let points = days
                    .into_iter()
                    .map(|(date, (value, holiday))| TimeSeriesPoint::from_date(date, value, holiday))
                    .collect();
                (atm, points)
            })
            .collect();

        Self { series }
    }

    /// Insert (or replace) one ATM's series.
    ///
    /// Dated points are sorted chronologically; the sort is stable so undated
    /// points keep their input order.
    pub fn insert(&mut self, atm: impl Into<String>, mut points: Vec<TimeSeriesPoint>) {
        if points.iter().all(|p| p.date.is_some()) {
            points.sort_by_key(|p| p.date);
        }
        self.series.insert(atm.into(), points);
    }

    pub fn get(&self, atm: &str) -> Option<&[TimeSeriesPoint]> {
        self.series.get(atm).map(Vec::as_slice)
    }

    pub fn contains(&self, atm: &str) -> bool {
        self.series.contains_key(atm)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TimeSeriesPoint])> {
        self.series.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn total_points(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

/// `lag` consecutive points of one ATM, encoded step by step, with the load
/// to be forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisedWindow {
    pub atm: String,
    /// Series index of the first point in the window.
    pub start: usize,
    /// `lag` rows of encoded features, oldest first.
    pub steps: Vec<Vec<f64>>,
    /// Raw loads of the window points, oldest first.
    pub loads: Vec<f64>,
    /// Load `horizon` steps after the last point; `None` for current-state windows.
    pub target: Option<f64>,
    /// Steps from the last window point to the target; 0 for current-state windows.
    #[serde(default)]
    pub horizon: usize,
}

impl SupervisedWindow {
    pub fn lag(&self) -> usize {
        self.steps.len()
    }

    /// Number of features per step.
    pub fn step_width(&self) -> usize {
        self.steps.first().map_or(0, Vec::len)
    }

    /// Flat feature vector (`lag * step_width`), oldest step first.
    pub fn flatten(&self) -> Vec<f64> {
        self.steps.iter().flatten().copied().collect()
    }

    pub fn mean_load(&self) -> Option<f64> {
        if self.loads.is_empty() {
            return None;
        }
        Some(self.loads.iter().sum::<f64>() / self.loads.len() as f64)
    }

    pub fn is_finite(&self) -> bool {
        self.steps.iter().flatten().all(|v| v.is_finite())
            && self.target.is_none_or(f64::is_finite)
    }
}

/// Registered classical regressors, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassicAlgorithm {
    Linear,
    Ridge,
    Huber,
    Tree,
    Forest,
}

impl ClassicAlgorithm {
    pub const ALL: [ClassicAlgorithm; 5] = [
        ClassicAlgorithm::Linear,
        ClassicAlgorithm::Ridge,
        ClassicAlgorithm::Huber,
        ClassicAlgorithm::Tree,
        ClassicAlgorithm::Forest,
    ];

    /// Label used in reports and the `algorithm` export column.
    pub fn display_name(self) -> &'static str {
        match self {
            ClassicAlgorithm::Linear => "LinearRegression",
            ClassicAlgorithm::Ridge => "Ridge",
            ClassicAlgorithm::Huber => "HuberRegressor",
            ClassicAlgorithm::Tree => "DecisionTreeRegressor",
            ClassicAlgorithm::Forest => "RandomForestRegressor",
        }
    }
}

/// Algorithm trained per ATM by the predictor: any classical regressor or
/// the LSTM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PredictorModel {
    Linear,
    Ridge,
    Huber,
    Tree,
    Forest,
    Lstm,
}

impl PredictorModel {
    /// The classical regressor behind this choice; `None` for the LSTM.
    pub fn classic(self) -> Option<ClassicAlgorithm> {
        match self {
            PredictorModel::Linear => Some(ClassicAlgorithm::Linear),
            PredictorModel::Ridge => Some(ClassicAlgorithm::Ridge),
            PredictorModel::Huber => Some(ClassicAlgorithm::Huber),
            PredictorModel::Tree => Some(ClassicAlgorithm::Tree),
            PredictorModel::Forest => Some(ClassicAlgorithm::Forest),
            PredictorModel::Lstm => None,
        }
    }
}

/// Per-ATM metrics of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmMetrics {
    pub atm: String,
    pub mean_accuracy: f64,
    pub r2: f64,
    pub mean_absolute_error: f64,
    /// Number of held-out predictions.
    pub predictions: usize,
    /// Number of walk-forward folds (1 for a single train/test split).
    pub folds: usize,
}

/// Summary of one algorithm run, averaged over the evaluated ATMs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub algorithm: String,
    pub run_index: usize,
    pub mean_accuracy: f64,
    pub r2: f64,
    pub mean_absolute_error: f64,
    pub atms_evaluated: usize,
    pub atms_skipped: usize,
}
