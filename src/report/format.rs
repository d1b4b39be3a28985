//! Formatted terminal output for every command.
//!
//! We keep formatting code in one place so:
//! - the evaluation and decision code stays free of presentation
//! - output changes are localized

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::app::pipeline::{ApplyRun, ClassicRun, DeepRun, ImportSummary};
use crate::io::RowError;
use crate::report::rank_results;

/// Row errors listed in full before the rest is summarised.
const MAX_ROW_ERRORS: usize = 10;

pub fn format_import_summary(summary: &ImportSummary) -> String {
    format!(
        "=== atmo - import ===\nSource: {}\nWrote {} rows for {} ATMs to {}\n",
        summary.source,
        summary.rows_written,
        summary.atms,
        summary.path.display()
    )
}

/// Sweep results table (best run marked with `*`), failures and skipped ATMs.
pub fn format_classic_run(run: &ClassicRun) -> String {
    let mut out = String::new();
    out.push_str("=== atmo - classic model evaluation ===\n");
    out.push_str(&format!(
        "History: {} ATMs, {} points ({} rows skipped)\n",
        run.history.series.len(),
        run.history.series.total_points(),
        run.history.row_errors.len()
    ));
    out.push_str(&format_row_errors(&run.history.row_errors));

    let ranked = rank_results(run.sweep.results.iter().map(|(r, _)| r));
    let best = ranked.first().map(|r| r.run_index);

    out.push('\n');
    out.push_str(&table_header("#", "algorithm"));
    for (result, _) in &run.sweep.results {
        let mark = if Some(result.run_index) == best { "*" } else { " " };
        out.push_str(&format!(
            "{mark}{:<3} {:<24} {:>10} {:>10} {:>14} {:>6} {:>7}\n",
            result.run_index,
            truncate(&result.algorithm, 24),
            fmt_metric(result.mean_accuracy),
            fmt_metric(result.r2),
            fmt_amount(result.mean_absolute_error),
            result.atms_evaluated,
            result.atms_skipped,
        ));
    }

    if !run.sweep.failures.is_empty() {
        out.push_str("\nFailed algorithms:\n");
        for f in &run.sweep.failures {
            out.push_str(&format!("  [{}] {}: {}\n", f.index, f.name, f.error));
        }
    }
    if run.sweep.halted {
        out.push_str("Sweep halted after the first failure.\n");
    }

    let mut skipped: BTreeMap<&str, String> = run
        .windows_skipped
        .iter()
        .map(|(atm, err)| (atm.as_str(), err.to_string()))
        .collect();
    for (_, table) in &run.sweep.results {
        for (atm, err) in &table.skipped {
            skipped
                .entry(atm.as_str())
                .or_insert_with(|| format!("{}: {err}", table.algorithm));
        }
    }
    out.push_str(&format_skipped(&skipped));
    out.push_str(&format_exports(&run.exports));
    out
}

/// One summary row per evaluated horizon.
pub fn format_deep_run(run: &DeepRun) -> String {
    let mut out = String::new();
    out.push_str("=== atmo - LSTM evaluation ===\n");
    out.push_str(&format!(
        "History: {} ATMs, {} points\n\n",
        run.history.series.len(),
        run.history.series.total_points()
    ));

    out.push_str(&table_header("h", "model"));
    for eval in &run.evaluations {
        let s = eval.table.summary(eval.horizon);
        out.push_str(&format!(
            " {:<3} {:<24} {:>10} {:>10} {:>14} {:>6} {:>7}\n",
            eval.horizon,
            s.algorithm,
            fmt_metric(s.mean_accuracy),
            fmt_metric(s.r2),
            fmt_amount(s.mean_absolute_error),
            s.atms_evaluated,
            s.atms_skipped,
        ));
    }

    if !run.failures.is_empty() {
        out.push_str("\nFailed horizons:\n");
        for (horizon, err) in &run.failures {
            out.push_str(&format!("  h={horizon}: {err}\n"));
        }
    }
    out.push_str(&format_exports(&run.exports));
    out
}

/// The due list, then everything that could not be decided.
pub fn format_apply_run(run: &ApplyRun) -> String {
    let mut out = String::new();
    let report = &run.decisions;
    let due: Vec<&str> = report.due_atms().collect();

    out.push_str("=== atmo - resupply decisions ===\n");
    out.push_str(&format!(
        "Decided {} ATMs: {} due, {} not due\n",
        report.decisions.len(),
        due.len(),
        report.decisions.len() - due.len()
    ));
    out.push_str(&format_row_errors(&run.current.row_errors));

    out.push_str("\nDue for resupply:\n");
    if due.is_empty() {
        out.push_str("  (none)\n");
    }
    for atm in &due {
        out.push_str(&format!("  {atm}\n"));
    }

    if !report.unknown.is_empty() {
        out.push_str("\nATMs without training data:\n");
        out.push_str(&format!("  {}\n", report.unknown.join(", ")));
    }

    let mut undecided: BTreeMap<&str, String> = report
        .failures
        .iter()
        .map(|(atm, err)| (atm.as_str(), err.to_string()))
        .collect();
    for (atm, err) in &run.current.windows.skipped {
        undecided.insert(atm.as_str(), err.to_string());
    }
    if !undecided.is_empty() {
        out.push_str("\nNot decided:\n");
        for (atm, reason) in &undecided {
            let cause = run.training.failures.get(*atm).map(|e| format!(" (training: {e})"));
            out.push_str(&format!("  {atm}: {reason}{}\n", cause.unwrap_or_default()));
        }
    }
    out
}

fn table_header(first: &str, name: &str) -> String {
    let mut out = format!(
        " {first:<3} {name:<24} {:>10} {:>10} {:>14} {:>6} {:>7}\n",
        "accuracy", "r2", "mae", "atms", "skipped"
    );
    out.push_str(&format!(
        " {:-<3} {:-<24} {:-<10} {:-<10} {:-<14} {:-<6} {:-<7}\n",
        "", "", "", "", "", "", ""
    ));
    out
}

fn format_row_errors(errors: &[RowError]) -> String {
    let mut out = String::new();
    for err in errors.iter().take(MAX_ROW_ERRORS) {
        let atm = err.atm.as_deref().map(|a| format!(" [{a}]")).unwrap_or_default();
        out.push_str(&format!("  line {}{atm}: {}\n", err.line, err.message));
    }
    if errors.len() > MAX_ROW_ERRORS {
        out.push_str(&format!("  ... and {} more\n", errors.len() - MAX_ROW_ERRORS));
    }
    out
}

fn format_skipped(skipped: &BTreeMap<&str, String>) -> String {
    if skipped.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nSkipped ATMs:\n");
    for (atm, reason) in skipped {
        out.push_str(&format!("  {atm}: {reason}\n"));
    }
    out
}

fn format_exports(paths: &[impl AsRef<std::path::Path>]) -> String {
    if paths.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nWrote:\n");
    for p in paths {
        out.push_str(&format!("  {}\n", p.as_ref().display()));
    }
    out
}

fn fmt_metric(v: f64) -> String {
    fmt_or_na(v, |v| format!("{v:.4}"))
}

fn fmt_amount(v: f64) -> String {
    fmt_or_na(v, |v| format!("{v:.2}"))
}

fn fmt_or_na<T: Display>(v: f64, f: impl Fn(f64) -> T) -> String {
    if v.is_finite() { f(v).to_string() } else { "n/a".to_string() }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
