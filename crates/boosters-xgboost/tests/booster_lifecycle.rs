//! Booster lifecycle against the in-process engine.
//!
//! Covers the flows a caller strings together: build matrices, train,
//! evaluate, persist and restore.

use approx::assert_abs_diff_eq;
use boosters_xgboost::testing::{data, fake};
use boosters_xgboost::{dump_format, Booster, DMatrix, HandleKind, PredictMask, XgbError};

fn training_matrix(engine: &boosters_xgboost::Engine) -> DMatrix {
    let mut dtrain = DMatrix::from_dense(engine, &data::cubic_rows(20, 3), f32::NAN)
        .expect("dense matrix");
    dtrain.set_label(&data::cubic_labels(20)).expect("labels");
    dtrain
}

#[test]
fn train_predict_and_evaluate() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let mut booster = Booster::new(&engine, &[&dtrain]).expect("booster");
    booster.set_params(data::REGRESSION_PARAMS.iter().copied()).unwrap();

    let first = booster.predict(&dtrain, PredictMask::NORMAL, 0).unwrap();
    for iter in 0..10 {
        booster.update_one_iter(iter, &dtrain).unwrap();
    }
    let preds = booster.predict(&dtrain, PredictMask::NORMAL, 0).unwrap();
    assert_eq!(preds.len(), 20);

    let labels = dtrain.label().unwrap();
    assert!(data::total_abs_deviation(&labels, &preds) < data::total_abs_deviation(&labels, &first));

    let report = booster.eval_one_iter(9, &[&dtrain], &["train"]).unwrap();
    assert!(report.starts_with("[9]"), "{report}");
    assert!(report.contains("train-rmse:"), "{report}");
}

#[test]
fn model_file_round_trip() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let mut booster = Booster::new(&engine, &[&dtrain]).unwrap();
    for iter in 0..5 {
        booster.update_one_iter(iter, &dtrain).unwrap();
    }
    booster.set_attr("best_iteration", "4").unwrap();
    let expected = booster.predict(&dtrain, PredictMask::NORMAL, 0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");
    booster.save_model(&path).unwrap();

    let mut restored = Booster::new(&engine, &[]).unwrap();
    restored.load_model(&path).unwrap();
    let actual = restored.predict(&dtrain, PredictMask::NORMAL, 0).unwrap();

    for (a, e) in actual.iter().zip(&expected) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-6);
    }
    assert_eq!(restored.get_attr("best_iteration").unwrap().as_deref(), Some("4"));
}

#[test]
fn raw_buffer_round_trip() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let mut booster = Booster::new(&engine, &[&dtrain]).unwrap();
    for iter in 0..3 {
        booster.update_one_iter(iter, &dtrain).unwrap();
    }
    let raw = booster.model_raw().unwrap();
    assert!(!raw.is_empty());

    let mut restored = Booster::new(&engine, &[]).unwrap();
    restored.load_model_from_buffer(&raw).unwrap();
    assert_eq!(restored.model_raw().unwrap(), raw);
}

#[test]
fn corrupt_model_is_a_native_error() {
    let engine = fake::engine();
    let mut booster = Booster::new(&engine, &[]).unwrap();
    let err = booster.load_model_from_buffer(b"not a model").unwrap_err();
    assert!(err.is_native(), "{err:?}");
    assert!(err.to_string().contains("invalid model format"), "{err}");
}

#[test]
fn json_dump_is_parseable() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let mut booster = Booster::new(&engine, &[&dtrain]).unwrap();
    for iter in 0..4 {
        booster.update_one_iter(iter, &dtrain).unwrap();
    }

    let trees = booster.dump_model_ex(None, true, dump_format::JSON).unwrap();
    assert_eq!(trees.len(), 4);
    for tree in &trees {
        let node: serde_json::Value = serde_json::from_str(tree).expect("valid json");
        assert_eq!(node["nodeid"], 0);
        assert!(node["leaf"].is_number());
        assert!(node.get("cover").is_some());
    }
}

#[test]
fn matrix_file_round_trip() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("train.buffer");
    dtrain.save_binary(&path, true).unwrap();

    let loaded = DMatrix::from_file(&engine, &path, true).unwrap();
    assert_eq!(loaded.shape().unwrap(), (20, 3));
    assert_eq!(loaded.label().unwrap(), dtrain.label().unwrap());
}

#[test]
fn missing_matrix_file_is_a_native_error() {
    let engine = fake::engine();
    let dir = tempfile::tempdir().unwrap();
    let err = DMatrix::from_file(&engine, dir.path().join("absent"), true).unwrap_err();
    assert!(err.is_native(), "{err:?}");
}

#[test]
fn handles_are_freed_exactly_once() {
    let engine = fake::engine();
    let before = fake::live_handles();
    {
        let dtrain = training_matrix(&engine);
        let mut booster = Booster::new(&engine, &[&dtrain]).unwrap();
        assert_eq!(fake::live_handles(), before + 2);
        booster.release().unwrap();
        assert_eq!(fake::live_handles(), before + 1);
        assert!(matches!(
            booster.release().unwrap_err(),
            XgbError::Released {
                kind: HandleKind::Booster
            }
        ));
    }
    assert_eq!(fake::live_handles(), before);
}

#[test]
fn handles_move_across_threads() {
    let engine = fake::engine();
    let dtrain = training_matrix(&engine);
    let booster = Booster::new(&engine, &[&dtrain]).unwrap();

    let shape = std::thread::scope(|s| {
        s.spawn(|| {
            let preds = booster.predict(&dtrain, PredictMask::NORMAL, 0).unwrap();
            (preds.len(), dtrain.num_col().unwrap())
        })
        .join()
        .unwrap()
    });
    assert_eq!(shape, (20, 3));
}
