//! Supervised-window building.
//!
//! Turns a chronologically ordered per-ATM series into fixed-width windows:
//!
//! - training mode: every window of `lag` points paired with the load
//!   `horizon` steps after the window (sliding step 1)
//! - current-state mode: exactly one window made of the most recent `lag`
//!   points, with no target
//!
//! Windows never mix ATMs and never include their own target.

use std::collections::BTreeMap;

use crate::domain::{AtmSeries, SupervisedWindow, TimeSeriesPoint, WindowConfig};
use crate::error::ForecastError;

/// Build all training windows for one ATM.
///
/// A series of length `L` yields `max(0, L - lag - horizon + 1)` windows; the
/// target of window `i` is the value of point `i + lag + horizon - 1`.
pub fn build_training_windows(
    atm: &str,
    points: &[TimeSeriesPoint],
    config: &WindowConfig,
    horizon: usize,
) -> Result<Vec<SupervisedWindow>, ForecastError> {
    config.validate()?;
    if horizon == 0 {
        return Err(ForecastError::InvalidConfig("horizon must be >= 1".to_string()));
    }
    ensure_length(atm, points, config.lag)?;

    let encoded: Vec<Vec<f64>> = points.iter().map(|p| config.features.encode(p)).collect();
    let reach = config.lag + horizon - 1;
    let count = points.len().saturating_sub(reach);

    let windows = (0..count)
        .map(|start| {
            let end = start + config.lag;
            SupervisedWindow {
                atm: atm.to_string(),
                start,
                steps: encoded[start..end].to_vec(),
                loads: points[start..end].iter().map(|p| p.value).collect(),
                target: Some(points[start + reach].value),
                horizon,
            }
        })
        .collect();

    Ok(windows)
}

/// Build the single current-state window of one ATM from its latest `lag` points.
pub fn build_current_window(
    atm: &str,
    points: &[TimeSeriesPoint],
    config: &WindowConfig,
) -> Result<SupervisedWindow, ForecastError> {
    config.validate()?;
    ensure_length(atm, points, config.lag)?;

    let start = points.len() - config.lag;
    let recent = &points[start..];
    Ok(SupervisedWindow {
        atm: atm.to_string(),
        start,
        steps: recent.iter().map(|p| config.features.encode(p)).collect(),
        loads: recent.iter().map(|p| p.value).collect(),
        target: None,
        horizon: 0,
    })
}

/// Training windows for every ATM.
///
/// Each ATM is converted independently; an ATM whose series is too short is
/// reported in the second map instead of aborting the whole conversion.
pub fn build_all_training_windows(
    series: &AtmSeries,
    config: &WindowConfig,
    horizon: usize,
) -> Result<WindowSets, ForecastError> {
    config.validate()?;

    let mut sets = WindowSets::default();
    for (atm, points) in series.iter() {
        match build_training_windows(atm, points, config, horizon) {
            Ok(windows) => {
                sets.windows.insert(atm.to_string(), windows);
            }
            Err(err @ ForecastError::InsufficientData { .. }) => {
                sets.skipped.insert(atm.to_string(), err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(sets)
}

/// Current-state windows for every ATM ("test" conversion mode).
pub fn build_all_current_windows(
    series: &AtmSeries,
    config: &WindowConfig,
) -> Result<CurrentWindows, ForecastError> {
    config.validate()?;

    let mut out = CurrentWindows::default();
    for (atm, points) in series.iter() {
        match build_current_window(atm, points, config) {
            Ok(window) => {
                out.windows.insert(atm.to_string(), window);
            }
            Err(err @ ForecastError::InsufficientData { .. }) => {
                out.skipped.insert(atm.to_string(), err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

/// Per-ATM training windows plus the ATMs that could not be windowed.
#[derive(Debug, Clone, Default)]
pub struct WindowSets {
    pub windows: BTreeMap<String, Vec<SupervisedWindow>>,
    pub skipped: BTreeMap<String, ForecastError>,
}

/// One current-state window per ATM plus the ATMs that could not be windowed.
#[derive(Debug, Clone, Default)]
pub struct CurrentWindows {
    pub windows: BTreeMap<String, SupervisedWindow>,
    pub skipped: BTreeMap<String, ForecastError>,
}

fn ensure_length(atm: &str, points: &[TimeSeriesPoint], lag: usize) -> Result<(), ForecastError> {
    if points.len() < lag {
        return Err(ForecastError::InsufficientData {
            atm: atm.to_string(),
            required: lag,
            available: points.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureSet;
    use chrono::NaiveDate;

    fn series_points(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TimeSeriesPoint::from_date(d0 + chrono::Duration::days(i as i64), v, false))
            .collect()
    }

    fn value_config(lag: usize) -> WindowConfig {
        WindowConfig::new(lag, FeatureSet::value_only())
    }

    #[test]
    fn worked_example_lag_three() {
        let points = series_points(&[10.0, 12.0, 11.0, 15.0, 20.0, 9.0, 8.0]);
        let windows = build_training_windows("A", &points, &value_config(3), 1).unwrap();

        let got: Vec<(Vec<f64>, f64)> = windows
            .iter()
            .map(|w| (w.flatten(), w.target.unwrap()))
            .collect();
        assert_eq!(
            got,
            vec![
                (vec![10.0, 12.0, 11.0], 15.0),
                (vec![12.0, 11.0, 15.0], 20.0),
                (vec![11.0, 15.0, 20.0], 9.0),
                (vec![15.0, 20.0, 9.0], 8.0),
            ]
        );
    }

    #[test]
    fn windows_record_their_horizon() {
        let points = series_points(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let windows = build_training_windows("A", &points, &value_config(2), 3).unwrap();
        assert!(windows.iter().all(|w| w.horizon == 3));
        assert_eq!(build_current_window("A", &points, &value_config(2)).unwrap().horizon, 0);
    }

    #[test]
    fn window_count_and_width_for_all_lags() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let points = series_points(&values);
        for lag in 1..=20 {
            let windows = build_training_windows("A", &points, &value_config(lag), 1).unwrap();
            assert_eq!(windows.len(), 20 - lag, "lag={lag}");
            for (i, w) in windows.iter().enumerate() {
                assert_eq!(w.lag(), lag);
                assert_eq!(w.start, i);
            }
        }
    }

    #[test]
    fn target_is_never_inside_the_window() {
        let values: Vec<f64> = (0..30).map(|i| (i * 7 % 11) as f64).collect();
        let points = series_points(&values);
        for horizon in 1..=6 {
            let windows = build_training_windows("A", &points, &value_config(5), horizon).unwrap();
            assert_eq!(windows.len(), 30 - 5 - horizon + 1);
            for w in &windows {
                let target_idx = w.start + 5 + horizon - 1;
                assert_eq!(w.target, Some(values[target_idx]));
                assert_eq!(w.loads, values[w.start..w.start + 5].to_vec());
            }
        }
    }

    #[test]
    fn short_series_is_insufficient() {
        let points = series_points(&[1.0, 2.0]);
        let err = build_training_windows("ATM9", &points, &value_config(3), 1).unwrap_err();
        assert_eq!(
            err,
            ForecastError::InsufficientData {
                atm: "ATM9".to_string(),
                required: 3,
                available: 2
            }
        );
        assert!(build_current_window("ATM9", &points, &value_config(3)).is_err());
    }

    #[test]
    fn current_window_uses_latest_points_without_target() {
        let points = series_points(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let config = WindowConfig::new(2, FeatureSet::default());
        let w = build_current_window("A", &points, &config).unwrap();
        assert_eq!(w.start, 3);
        assert_eq!(w.loads, vec![4.0, 5.0]);
        assert_eq!(w.target, None);
        assert_eq!(w.step_width(), 6);
        // Value is the last encoded feature in the default set.
        assert_eq!(w.steps[1][5], 5.0);
    }

    #[test]
    fn all_windows_skip_short_atms() {
        let mut series = AtmSeries::new();
        series.insert("A", series_points(&[1.0, 2.0, 3.0, 4.0]));
        series.insert("B", series_points(&[1.0]));

        let sets = build_all_training_windows(&series, &value_config(2), 1).unwrap();
        assert_eq!(sets.windows["A"].len(), 2);
        assert!(sets.skipped.contains_key("B"));
        assert!(sets.windows.values().flatten().all(|w| w.atm == "A"));
    }
}
