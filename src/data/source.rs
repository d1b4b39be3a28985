//! Raw withdrawal data sources.
//!
//! A source only has to hand back `(atm_code, date, value, holiday?)`
//! observations; normalisation into the history CSV happens in `import-data`.

use std::path::PathBuf;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::RawObservation;
use crate::error::AppError;
use crate::io::history::read_observations;

pub trait RawDataSource {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    fn fetch(&self) -> Result<Vec<RawObservation>, AppError>;
}

/// A local CSV export with `atm_code,date,value[,holiday]` columns.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    pub path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RawDataSource for CsvFileSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn fetch(&self) -> Result<Vec<RawObservation>, AppError> {
        let (observations, row_errors, rows_read) = read_observations(&self.path)?;
        for err in &row_errors {
            warn!(line = err.line, atm = ?err.atm, "{}", err.message);
        }
        debug!(rows_read, rows_used = observations.len(), "raw csv read");
        Ok(observations)
    }
}

/// A JSON endpoint returning withdrawal observations.
///
/// The body is either a bare array of observations or an object with an
/// `observations` array. Values may be numbers or strings (decimal comma
/// accepted); entries without a usable value are dropped.
pub struct HttpSource {
    client: Client,
    url: String,
    token: Option<String>,
    since: Option<NaiveDate>,
}

impl HttpSource {
    /// Configure from `ATMO_SOURCE_URL` and optional `ATMO_SOURCE_TOKEN` (`.env` honoured).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let url = std::env::var("ATMO_SOURCE_URL")
            .map_err(|_| AppError::new(2, "Missing ATMO_SOURCE_URL in environment (.env)."))?;
        let token = std::env::var("ATMO_SOURCE_TOKEN").ok().filter(|t| !t.is_empty());
        Ok(Self::new(url, token))
    }

    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token,
            since: None,
        }
    }

    /// Only request observations on or after `date`.
    pub fn since(mut self, date: Option<NaiveDate>) -> Self {
        self.since = date;
        self
    }
}

impl RawDataSource for HttpSource {
    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }

    fn fetch(&self) -> Result<Vec<RawObservation>, AppError> {
        let mut req = self.client.get(&self.url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(date) = self.since {
            req = req.query(&[("since", &date.to_string())]);
        }

        let resp = req
            .send()
            .map_err(|e| AppError::new(4, format!("Raw data request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::new(
                4,
                format!("Raw data request failed with status {}.", resp.status()),
            ));
        }

        let body = resp
            .text()
            .map_err(|e| AppError::new(4, format!("Failed to read raw data response: {e}")))?;
        parse_payload(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Wrapped { observations: Vec<WireObservation> },
    Bare(Vec<WireObservation>),
}

#[derive(Debug, Deserialize)]
struct WireObservation {
    #[serde(alias = "atm")]
    atm_code: String,
    date: String,
    value: WireValue,
    #[serde(default)]
    holiday: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Number(f64),
    Text(String),
}

impl WireValue {
    fn parse(&self) -> Option<f64> {
        let v = match self {
            WireValue::Number(v) => *v,
            WireValue::Text(s) => s.trim().replace(',', ".").parse().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

fn parse_payload(body: &str) -> Result<Vec<RawObservation>, AppError> {
    let payload: Payload = serde_json::from_str(body)
        .map_err(|e| AppError::new(4, format!("Failed to parse raw data response: {e}")))?;
    let wire = match payload {
        Payload::Wrapped { observations } | Payload::Bare(observations) => observations,
    };

    let mut out = Vec::with_capacity(wire.len());
    for obs in wire {
        let Some(value) = obs.value.parse() else {
            debug!(atm = %obs.atm_code, date = %obs.date, "dropping observation without value");
            continue;
        };
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d")
            .map_err(|e| AppError::new(4, format!("Invalid raw data date '{}': {e}", obs.date)))?;
        out.push(RawObservation {
            atm_code: obs.atm_code,
            date,
            value,
            holiday: obs.holiday,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn payload_accepts_both_shapes() {
        let bare = r#"[{"atm_code":"A","date":"2024-05-01","value":120.5}]"#;
        let wrapped = r#"{"observations":[{"atm":"A","date":"2024-05-01","value":"120,5","holiday":true}]}"#;

        let a = parse_payload(bare).unwrap();
        let b = parse_payload(wrapped).unwrap();
        assert_eq!(a[0].value, 120.5);
        assert_eq!(b[0].value, 120.5);
        assert_eq!(a[0].holiday, None);
        assert_eq!(b[0].holiday, Some(true));
    }

    #[test]
    fn missing_values_are_dropped_but_bad_dates_fail() {
        let body = r#"[{"atm_code":"A","date":"2024-05-01","value":"."},
                       {"atm_code":"A","date":"2024-05-02","value":3}]"#;
        let obs = parse_payload(body).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());

        let bad = r#"[{"atm_code":"A","date":"05/02/2024","value":3}]"#;
        assert_eq!(parse_payload(bad).unwrap_err().exit_code(), 4);
        assert!(parse_payload("{}").is_err());
    }

    #[test]
    fn csv_source_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"atm,date,value\nA,2024-05-01,10\nA,2024-05-02,oops\n")
            .unwrap();

        let source = CsvFileSource::new(&path);
        let obs = source.fetch().unwrap();
        assert_eq!(obs.len(), 1);
        assert!(source.describe().starts_with("csv:"));
    }
}
