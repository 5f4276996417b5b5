//! Property tests for dense construction and per-row fields.

use boosters_xgboost::testing::fake;
use boosters_xgboost::{DMatrix, XgbError};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

fn finite_f32() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

/// Rectangular row sets with 1..=8 rows and 1..=5 columns.
fn dense_rows() -> impl Strategy<Value = Vec<Vec<f32>>> {
    (1usize..=8, 1usize..=5)
        .prop_flat_map(|(rows, cols)| prop_vec(prop_vec(finite_f32(), cols), rows))
}

proptest! {
    #[test]
    fn shape_matches_input(rows in dense_rows()) {
        let engine = fake::engine();
        let dmat = DMatrix::from_dense(&engine, &rows, f32::NAN).unwrap();
        prop_assert_eq!(dmat.shape().unwrap(), (rows.len(), rows[0].len()));
    }

    #[test]
    fn float_fields_round_trip(
        (rows, labels, weights) in dense_rows().prop_flat_map(|rows| {
            let n = rows.len();
            (Just(rows), prop_vec(finite_f32(), n), prop_vec(finite_f32(), n))
        })
    ) {
        let engine = fake::engine();
        let mut dmat = DMatrix::from_dense(&engine, &rows, f32::NAN).unwrap();
        dmat.set_label(&labels).unwrap();
        dmat.set_weight(&weights).unwrap();
        prop_assert_eq!(dmat.label().unwrap(), labels);
        prop_assert_eq!(dmat.get_float_info("weight").unwrap(), weights);
    }

    #[test]
    fn group_sizes_become_boundaries(sizes in prop_vec(1u32..=4, 1..=5)) {
        let n_rows: u32 = sizes.iter().sum();
        let rows = vec![vec![0.0f32; 2]; n_rows as usize];
        let engine = fake::engine();
        let mut dmat = DMatrix::from_dense(&engine, &rows, f32::NAN).unwrap();
        dmat.set_group(&sizes).unwrap();

        let boundaries = dmat.get_uint_info("group_ptr").unwrap();
        prop_assert_eq!(boundaries.len(), sizes.len() + 1);
        prop_assert_eq!(boundaries[0], 0);
        prop_assert_eq!(*boundaries.last().unwrap(), n_rows);
        for (w, size) in boundaries.windows(2).zip(&sizes) {
            prop_assert_eq!(w[1] - w[0], *size);
        }
    }

    #[test]
    fn ragged_rows_are_rejected_before_the_engine(
        rows in dense_rows(),
        extra in 1usize..=3,
    ) {
        prop_assume!(rows.len() > 1);
        let mut rows = rows;
        let last = rows.len() - 1;
        rows[last].extend(std::iter::repeat(0.0).take(extra));

        let engine = fake::engine();
        let before = fake::calls();
        let err = DMatrix::from_dense(&engine, &rows, f32::NAN).unwrap_err();
        let is_shape = matches!(err, XgbError::Shape { row_index, .. } if row_index == last);
        prop_assert!(is_shape);
        prop_assert_eq!(fake::calls(), before);
    }
}
