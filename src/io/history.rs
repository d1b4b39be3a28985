//! Normalized withdrawal history CSV.
//!
//! The history file is the hand-off between `import-data` and every other
//! command. Its schema is `atm_code,date,value[,holiday]`:
//!
//! - header names are case-insensitive and may carry a UTF-8 BOM
//! - `atm` is accepted as an alias of `atm_code`
//! - bad rows are skipped and reported with their line number

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::Serialize;

use crate::domain::{AtmSeries, RawObservation};
use crate::error::AppError;

/// A row-level error encountered while reading a CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub atm: Option<String>,
    pub message: String,
}

/// Loaded history: per-ATM series plus what was skipped on the way.
#[derive(Debug, Clone)]
pub struct HistoryData {
    pub series: AtmSeries,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Read the history CSV into per-ATM series.
pub fn load_history(path: &Path) -> Result<HistoryData, AppError> {
    let (observations, row_errors, rows_read) = read_observations(path)?;
    let rows_used = observations.len();
    if rows_used == 0 {
        return Err(AppError::new(
            3,
            format!("No valid history rows in '{}'.", path.display()),
        ));
    }

    Ok(HistoryData {
        series: AtmSeries::from_observations(observations),
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Read raw observations without aggregating them.
pub fn read_observations(path: &Path) -> Result<(Vec<RawObservation>, Vec<RowError>, usize), AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let atm_col = atm_column(&header_map)?;
    let date_col = required_column(&header_map, "date")?;
    let value_col = required_column(&header_map, "value")?;
    let holiday_col = header_map.get("holiday").copied();

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; CSV lines are 1-based.
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

        let atm = field(&record, Some(atm_col)).map(str::to_string);
        let parsed = parse_row(&record, atm_col, date_col, value_col, holiday_col);

        match parsed {
            Ok(obs) => observations.push(obs),
            Err(message) => row_errors.push(RowError { line, atm, message }),
        }
    }

    Ok((observations, row_errors, rows_read))
}

fn parse_row(
    record: &StringRecord,
    atm_col: usize,
    date_col: usize,
    value_col: usize,
    holiday_col: Option<usize>,
) -> Result<RawObservation, String> {
    let atm_code = field(record, Some(atm_col)).ok_or("Missing ATM code.")?.to_string();
    let date = parse_date(field(record, Some(date_col)).ok_or("Missing date.")?)?;
    let value = parse_f64(field(record, Some(value_col)).ok_or("Missing value.")?)?;
    let holiday = field(record, holiday_col).map(parse_bool).transpose()?;
    Ok(RawObservation {
        atm_code,
        date,
        value,
        holiday,
    })
}

#[derive(Serialize)]
struct HistoryRecord<'a> {
    atm_code: &'a str,
    date: NaiveDate,
    value: f64,
    holiday: u8,
}

/// Write observations as the normalized history CSV.
///
/// Rows are sorted by ATM code then date so rewriting the same observations
/// produces an identical file. Returns the number of rows written.
pub fn write_history(path: &Path, observations: &[RawObservation]) -> Result<usize, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }

    let mut sorted: Vec<&RawObservation> = observations.iter().collect();
    sorted.sort_by(|a, b| {
        a.atm_code
            .cmp(&b.atm_code)
            .then(a.date.cmp(&b.date))
            .then(a.value.total_cmp(&b.value))
    });

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display())))?;
    for obs in &sorted {
        writer
            .serialize(HistoryRecord {
                atm_code: &obs.atm_code,
                date: obs.date,
                value: obs.value,
                holiday: u8::from(obs.holiday.unwrap_or(false)),
            })
            .map_err(|e| AppError::new(2, format!("Failed to write history row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush '{}': {e}", path.display())))?;

    Ok(sorted.len())
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

pub(crate) fn atm_column(header_map: &HashMap<String, usize>) -> Result<usize, AppError> {
    header_map
        .get("atm_code")
        .or_else(|| header_map.get("atm"))
        .copied()
        .ok_or_else(|| AppError::new(2, "Missing required column 'atm_code'."))
}

pub(crate) fn required_column(header_map: &HashMap<String, usize>, name: &str) -> Result<usize, AppError> {
    header_map
        .get(name)
        .copied()
        .ok_or_else(|| AppError::new(2, format!("Missing required column '{name}'.")))
}

/// Non-empty trimmed field at `col`.
pub(crate) fn field(record: &StringRecord, col: Option<usize>) -> Option<&str> {
    let s = record.get(col?)?.trim();
    if s.is_empty() { None } else { Some(s) }
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    // ISO is preferred; banking exports frequently use day-first formats.
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD-MM-YYYY, YYYY/MM/DD."
    ))
}

/// Parse a number, accepting a decimal comma.
pub(crate) fn parse_f64(s: &str) -> Result<f64, String> {
    let v = s
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| format!("Invalid number '{s}'."))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("Non-finite number '{s}'."))
    }
}

pub(crate) fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "n" | "f" => Ok(false),
        _ => Err(format!("Invalid flag '{s}'. Expected 0/1 or true/false.")),
    }
}

pub(crate) fn parse_u32(s: &str, name: &str) -> Result<u32, String> {
    // Some exports write integer columns as floats ("3.0").
    let v = parse_f64(s)?;
    if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
        Ok(v as u32)
    } else {
        Err(format!("Invalid {name} '{s}'."))
    }
}
