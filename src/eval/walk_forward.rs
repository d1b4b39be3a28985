//! Expanding-window split of one ATM's chronologically ordered windows.

use std::ops::Range;

use crate::domain::WalkForwardConfig;

/// One train/test split. Training is always a prefix ending where the test
/// block begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Folds over `n` windows.
///
/// The first boundary is `max(min_train_windows, floor(n * initial_train_fraction))`;
/// each fold tests the next `test_size` windows (the last block may be
/// shorter) and the boundary then advances by `test_size`. Returns no folds
/// when the first boundary leaves nothing to test.
pub fn walk_forward_folds(n: usize, config: &WalkForwardConfig) -> Vec<Fold> {
    let initial = (n as f64 * config.initial_train_fraction).floor() as usize;
    let mut boundary = initial.max(config.min_train_windows).max(1);
    let cap = config.max_folds.unwrap_or(usize::MAX);
    let step = config.test_size.max(1);

    let mut folds = Vec::new();
    while boundary < n && folds.len() < cap {
        folds.push(Fold {
            train: 0..boundary,
            test: boundary..(boundary + step).min(n),
        });
        boundary += step;
    }
    folds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frac: f64, min_train: usize, test_size: usize) -> WalkForwardConfig {
        WalkForwardConfig {
            initial_train_fraction: frac,
            min_train_windows: min_train,
            test_size,
            max_folds: None,
        }
    }

    #[test]
    fn folds_expand_and_cover_the_tail() {
        let folds = walk_forward_folds(20, &config(0.5, 4, 4));
        assert_eq!(
            folds,
            vec![
                Fold { train: 0..10, test: 10..14 },
                Fold { train: 0..14, test: 14..18 },
                Fold { train: 0..18, test: 18..20 },
            ]
        );
    }

    #[test]
    fn training_never_reaches_into_the_test_block() {
        for n in 0..60 {
            for fold in walk_forward_folds(n, &config(0.3, 3, 5)) {
                assert!(fold.train.end <= fold.test.start);
                assert_eq!(fold.train.start, 0);
                assert!(!fold.test.is_empty());
                assert!(fold.test.end <= n);
            }
        }
    }

    #[test]
    fn minimum_training_prefix_is_respected() {
        let folds = walk_forward_folds(12, &config(0.1, 8, 2));
        assert_eq!(folds[0].train, 0..8);
        assert_eq!(folds.len(), 2);
        assert!(walk_forward_folds(8, &config(0.1, 8, 2)).is_empty());
    }

    #[test]
    fn max_folds_caps_the_sweep() {
        let mut cfg = config(0.5, 1, 1);
        cfg.max_folds = Some(3);
        assert_eq!(walk_forward_folds(100, &cfg).len(), 3);
    }
}
