//! Rules turning a load forecast into a resupply decision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::SupervisedWindow;
use crate::error::ForecastError;

/// When an ATM counts as due for resupply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionRule {
    /// Due when the forecast reaches an absolute load.
    Threshold { min_load: f64 },
    /// Due when the forecast reaches `ratio` times the mean load of the
    /// current window.
    RecentMeanRatio { ratio: f64 },
    /// Due when the forecast reaches `fraction` of the ATM's cash capacity.
    CapacityFraction {
        default_capacity: f64,
        fraction: f64,
        #[serde(default)]
        capacities: BTreeMap<String, f64>,
    },
}

impl Default for DecisionRule {
    fn default() -> Self {
        DecisionRule::RecentMeanRatio { ratio: 1.2 }
    }
}

impl DecisionRule {
    pub fn validate(&self) -> Result<(), ForecastError> {
        let ok = match self {
            DecisionRule::Threshold { min_load } => min_load.is_finite(),
            DecisionRule::RecentMeanRatio { ratio } => ratio.is_finite() && *ratio > 0.0,
            DecisionRule::CapacityFraction {
                default_capacity,
                fraction,
                capacities,
            } => {
                default_capacity.is_finite()
                    && *default_capacity > 0.0
                    && fraction.is_finite()
                    && *fraction > 0.0
                    && capacities.values().all(|c| c.is_finite() && *c > 0.0)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ForecastError::InvalidConfig(format!("invalid decision rule: {self:?}")))
        }
    }

    /// Load level at or above which `atm` is due, given its current window.
    pub fn threshold(&self, atm: &str, window: &SupervisedWindow) -> f64 {
        match self {
            DecisionRule::Threshold { min_load } => *min_load,
            DecisionRule::RecentMeanRatio { ratio } => ratio * window.mean_load().unwrap_or(0.0),
            DecisionRule::CapacityFraction {
                default_capacity,
                fraction,
                capacities,
            } => fraction * capacities.get(atm).copied().unwrap_or(*default_capacity),
        }
    }

    pub fn is_due(&self, atm: &str, forecast: f64, window: &SupervisedWindow) -> bool {
        forecast.is_finite() && forecast >= self.threshold(atm, window)
    }
}
