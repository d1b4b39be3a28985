//! Reporting utilities: algorithm rankings and formatted terminal output.

use std::cmp::Ordering;

use crate::domain::EvaluationResult;

pub mod format;

pub use format::*;

/// Successful runs ordered best first: highest mean accuracy, then lowest
/// MAE. Runs with a NaN accuracy sort last.
pub fn rank_results<'a>(results: impl IntoIterator<Item = &'a EvaluationResult>) -> Vec<&'a EvaluationResult> {
    let mut ranked: Vec<&EvaluationResult> = results.into_iter().collect();
    ranked.sort_by(|a, b| {
        by_score_desc(a.mean_accuracy, b.mean_accuracy)
            .then_with(|| by_score_desc(-a.mean_absolute_error, -b.mean_absolute_error))
            .then(a.run_index.cmp(&b.run_index))
    });
    ranked
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(run_index: usize, accuracy: f64, mae: f64) -> EvaluationResult {
        EvaluationResult {
            algorithm: format!("alg{run_index}"),
            run_index,
            mean_accuracy: accuracy,
            r2: 0.0,
            mean_absolute_error: mae,
            atms_evaluated: 1,
            atms_skipped: 0,
        }
    }

    #[test]
    fn ranking_prefers_accuracy_then_error() {
        let results = vec![
            result(0, 0.8, 10.0),
            result(1, f64::NAN, 1.0),
            result(2, 0.9, 50.0),
            result(3, 0.8, 5.0),
        ];
        let order: Vec<usize> = rank_results(&results).iter().map(|r| r.run_index).collect();
        assert_eq!(order, vec![2, 3, 0, 1]);
    }
}
