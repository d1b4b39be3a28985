//! Synthetic withdrawal history for demos and tests.
//!
//! Each ATM gets its own base level. Daily loads follow a weekly profile,
//! rise over the last days of the month (salary payouts), drop on public
//! holidays and carry multiplicative log-normal noise with rare spikes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, Days, NaiveDate};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::RawObservation;
use crate::error::AppError;

/// Relative load per weekday, Monday first.
const WEEKLY_PROFILE: [f64; 7] = [1.05, 0.95, 0.95, 1.0, 1.3, 1.15, 0.6];
const MONTH_END_DAYS: u32 = 3;
const MONTH_END_BOOST: f64 = 1.35;
const HOLIDAY_FACTOR: f64 = 0.45;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub atms: usize,
    pub days: usize,
    pub start: NaiveDate,
    pub seed: u64,
    /// Mean daily load of an average ATM.
    pub base_level: f64,
    /// Standard deviation of the log-noise.
    pub noise: f64,
    /// Probability that a given calendar day is a public holiday.
    pub holiday_prob: f64,
    /// Probability and size of a one-day withdrawal spike.
    pub spike_prob: f64,
    pub spike_k: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            atms: 5,
            days: 365,
            start: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default(),
            seed: 42,
            base_level: 250_000.0,
            noise: 0.12,
            holiday_prob: 0.03,
            spike_prob: 0.02,
            spike_k: 0.6,
        }
    }
}

/// Generate `atms * days` observations, ordered by ATM then date.
pub fn generate_history(config: &SampleConfig) -> Result<Vec<RawObservation>, AppError> {
    if config.atms == 0 || config.days == 0 {
        return Err(AppError::new(2, "Sample needs at least one ATM and one day."));
    }
    if !(config.base_level.is_finite() && config.base_level > 0.0) {
        return Err(AppError::new(2, "Sample base level must be > 0."));
    }
    if !(config.noise.is_finite() && config.noise >= 0.0) {
        return Err(AppError::new(2, "Sample noise must be >= 0."));
    }
    for p in [config.holiday_prob, config.spike_prob] {
        if !(0.0..1.0).contains(&p) {
            return Err(AppError::new(2, "Sample probabilities must be in [0, 1)."));
        }
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    // Holidays are calendar-wide, shared by all ATMs.
    let calendar: Vec<(NaiveDate, bool)> = (0..config.days)
        .map(|d| {
            let date = config
                .start
                .checked_add_days(Days::new(d as u64))
                .ok_or_else(|| AppError::new(2, "Sample date range overflows the calendar."))?;
            let holiday = rng.r#gen::<f64>() < config.holiday_prob;
            Ok((date, holiday))
        })
        .collect::<Result<_, AppError>>()?;

    let correction = noise_mean_correction(config.noise, config.spike_prob, config.spike_k);
    let mut out = Vec::with_capacity(config.atms * config.days);

    for atm in 0..config.atms {
        let code = format!("ATM{:03}", atm + 1);
        let level = config.base_level * rng.gen_range(0.5..1.5);

        for &(date, holiday) in &calendar {
            let mut expected = level * WEEKLY_PROFILE[date.weekday().num_days_from_monday() as usize];
            if is_month_end(date) {
                expected *= MONTH_END_BOOST;
            }
            if holiday {
                expected *= HOLIDAY_FACTOR;
            }

            let spike = if rng.r#gen::<f64>() < config.spike_prob { config.spike_k } else { 0.0 };
            let z: f64 = normal.sample(&mut rng);
            let value = expected * (config.noise * z + spike - correction).exp();

            out.push(RawObservation {
                atm_code: code.clone(),
                date,
                value: value.round(),
                holiday: Some(holiday),
            });
        }
    }

    Ok(out)
}

fn is_month_end(date: NaiveDate) -> bool {
    (1..=MONTH_END_DAYS).any(|ahead| {
        date.checked_add_days(Days::new(ahead as u64))
            .is_some_and(|later| later.month() != date.month())
    })
}

// Keeps E[exp(noise + spike - correction)] == 1 so `expected` stays unbiased.
fn noise_mean_correction(sigma: f64, p_spike: f64, k_spike: f64) -> f64 {
    let m1 = (1.0 - p_spike) + p_spike * k_spike.exp();
    0.5 * sigma * sigma + m1.ln()
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.atms.hash(&mut hasher);
    config.days.hash(&mut hasher);
    config.start.hash(&mut hasher);
    config.base_level.to_bits().hash(&mut hasher);
    config.noise.to_bits().hash(&mut hasher);
    config.holiday_prob.to_bits().hash(&mut hasher);
    config.spike_prob.to_bits().hash(&mut hasher);
    config.spike_k.to_bits().hash(&mut hasher);
    hasher.finish()
}
