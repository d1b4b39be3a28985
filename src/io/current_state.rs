//! Current-state CSV consumed by `apply-models`.
//!
//! Each row is one recent observation of an ATM with its calendar columns
//! already derived:
//!
//! `atm_code, day_of_week, day_of_month, month, workday, holiday, value`
//!
//! Rows of one ATM are expected in chronological order. An optional `date`
//! column, when present on every row of an ATM, is used to sort them. Only
//! the columns needed by the configured feature set are required.

use std::collections::BTreeMap;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{AtmSeries, Feature, TimeSeriesPoint, WindowConfig};
use crate::error::AppError;
use crate::io::history::{
    atm_column, build_header_map, field, parse_bool, parse_date, parse_f64, parse_u32, required_column,
    RowError,
};
use crate::window::{build_all_current_windows, CurrentWindows};

/// Current-state windows plus what was skipped on the way.
#[derive(Debug, Clone)]
pub struct CurrentStateData {
    pub windows: CurrentWindows,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    atm: usize,
    value: usize,
    date: Option<usize>,
    day_of_week: Option<usize>,
    day_of_month: Option<usize>,
    month: Option<usize>,
    workday: Option<usize>,
    holiday: Option<usize>,
}

/// Read the current-state CSV and build one window per ATM.
pub fn load_current_state(path: &Path, config: &WindowConfig) -> Result<CurrentStateData, AppError> {
    config.validate()?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    // Every encoded feature needs a column; a date column can stand in for
    // the calendar ones.
    let has_date = header_map.contains_key("date");
    for &feature in config.features.features() {
        if feature == Feature::Value || !has_date {
            required_column(&header_map, feature.column())?;
        }
    }
    let column = |f: Feature| header_map.get(f.column()).copied();
    let cols = Columns {
        atm: atm_column(&header_map)?,
        value: required_column(&header_map, Feature::Value.column())?,
        date: header_map.get("date").copied(),
        day_of_week: column(Feature::DayOfWeek),
        day_of_month: column(Feature::DayOfMonth),
        month: column(Feature::Month),
        workday: column(Feature::Workday),
        holiday: column(Feature::Holiday),
    };

    let mut per_atm: BTreeMap<String, Vec<TimeSeriesPoint>> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    atm: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let atm = field(&record, Some(cols.atm)).map(str::to_string);
        match (atm.clone(), parse_point(&record, &cols)) {
            (Some(code), Ok(point)) => per_atm.entry(code).or_default().push(point),
            (None, _) => row_errors.push(RowError {
                line,
                atm: None,
                message: "Missing ATM code.".to_string(),
            }),
            (Some(_), Err(message)) => row_errors.push(RowError { line, atm, message }),
        }
    }

    if per_atm.is_empty() {
        return Err(AppError::new(
            3,
            format!("No valid current-state rows in '{}'.", path.display()),
        ));
    }

    let mut series = AtmSeries::new();
    for (atm, points) in per_atm {
        series.insert(atm, points);
    }
    let windows = build_all_current_windows(&series, config)?;

    Ok(CurrentStateData {
        windows,
        row_errors,
        rows_read,
    })
}

fn parse_point(record: &StringRecord, cols: &Columns) -> Result<TimeSeriesPoint, String> {
    let value = parse_f64(field(record, Some(cols.value)).ok_or("Missing value.")?)?;
    let holiday = field(record, cols.holiday).map(parse_bool).transpose()?.unwrap_or(false);

    // A date fills in any calendar column the file leaves out.
    let mut point = match field(record, cols.date) {
        Some(s) => TimeSeriesPoint::from_date(parse_date(s)?, value, holiday),
        None => TimeSeriesPoint {
            date: None,
            day_of_week: 0,
            day_of_month: 0,
            month: 0,
            workday: false,
            holiday,
            value,
        },
    };

    if let Some(s) = field(record, cols.day_of_week) {
        point.day_of_week = parse_u32(s, "day_of_week")?;
    }
    if let Some(s) = field(record, cols.day_of_month) {
        point.day_of_month = parse_u32(s, "day_of_month")?;
    }
    if let Some(s) = field(record, cols.month) {
        point.month = parse_u32(s, "month")?;
    }
    if let Some(s) = field(record, cols.workday) {
        point.workday = parse_bool(s)?;
    }
    Ok(point)
}
