//! Deterministic fixtures.

/// Parameters of the recorded regression baseline.
pub const REGRESSION_PARAMS: &[(&str, &str)] = &[
    ("booster", "gbtree"),
    ("objective", "reg:linear"),
    ("max_depth", "5"),
    ("eta", "0.1"),
    ("min_child_weight", "1"),
    ("subsample", "0.5"),
    ("colsample_bytree", "1"),
    ("num_parallel_tree", "1"),
    ("silent", "1"),
];

/// Boosting rounds of the recorded regression baseline.
pub const REGRESSION_ROUNDS: i32 = 200;

/// Upper bound on the total absolute deviation of the baseline on its
/// training rows.
pub const REGRESSION_TOLERANCE: f64 = 6.0;

/// Rows where entry `(i, j)` is `(i + 1) * (j + 1)`.
pub fn cubic_rows(n_rows: usize, n_cols: usize) -> Vec<Vec<f32>> {
    (0..n_rows)
        .map(|i| (0..n_cols).map(|j| ((i + 1) * (j + 1)) as f32).collect())
        .collect()
}

/// Labels `1 + i^3` for each row index.
pub fn cubic_labels(n_rows: usize) -> Vec<f32> {
    (0..n_rows).map(|i| (1 + i * i * i) as f32).collect()
}

/// Sum of absolute differences between `labels` and `predictions`.
pub fn total_abs_deviation(labels: &[f32], predictions: &[f32]) -> f64 {
    labels
        .iter()
        .zip(predictions)
        .map(|(y, p)| f64::from((y - p).abs()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_fixture_matches_definition() {
        assert_eq!(
            cubic_rows(5, 3),
            vec![
                vec![1.0, 2.0, 3.0],
                vec![2.0, 4.0, 6.0],
                vec![3.0, 6.0, 9.0],
                vec![4.0, 8.0, 12.0],
                vec![5.0, 10.0, 15.0],
            ]
        );
        assert_eq!(cubic_labels(5), vec![1.0, 2.0, 9.0, 28.0, 65.0]);
    }

    #[test]
    fn deviation_sums_absolute_error() {
        assert_eq!(total_abs_deviation(&[1.0, 2.0], &[0.5, 3.0]), 1.5);
    }
}
