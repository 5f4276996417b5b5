//! Train a small regression model, predict on the training rows and dump the
//! trees.
//!
//! Requires libxgboost; set `XGBOOST_LIBRARY_PATH` if it is not on the
//! loader's search path.
//!
//! Run with:
//! ```bash
//! RUST_LOG=boosters_xgboost=debug cargo run -p boosters-xgboost --example regression
//! ```

use boosters_xgboost::{Booster, DMatrix, Engine, PredictMask};
use tracing_subscriber::EnvFilter;

const N_ROWS: usize = 100;
const N_COLS: usize = 3;
const ROUNDS: i32 = 200;

fn rows() -> Vec<Vec<f32>> {
    (0..N_ROWS)
        .map(|i| (0..N_COLS).map(|j| ((i + 1) * (j + 1)) as f32).collect())
        .collect()
}

fn main() -> boosters_xgboost::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = match Engine::global() {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("could not load libxgboost: {err}");
            eprintln!("set XGBOOST_LIBRARY_PATH to the shared library and retry");
            return Err(err);
        }
    };
    println!("engine: {}", engine.origin().display());

    // Only the first half of the rows carries a non-zero label.
    let mut labels = vec![0.0f32; N_ROWS];
    for (i, label) in labels.iter_mut().enumerate().take(N_ROWS / 2) {
        *label = (1 + i * i * i) as f32;
    }

    let mut dtrain = DMatrix::from_dense(&engine, &rows(), -1.0)?;
    dtrain.set_label(&labels)?;
    for (i, label) in dtrain.label()?.iter().enumerate() {
        println!("label[{i}]={label:.0}");
    }

    let mut booster = Booster::new(&engine, &[&dtrain])?;
    booster.set_params([
        ("booster", "gbtree"),
        ("objective", "reg:linear"),
        ("eval_metric", "error"),
        ("silent", "0"),
        ("max_depth", "5"),
        ("eta", "0.1"),
        ("min_child_weight", "1"),
        ("gamma", "0.6"),
        ("colsample_bytree", "1"),
        ("subsample", "0.5"),
        ("num_parallel_tree", "1"),
        ("reg_alpha", "10"),
    ])?;

    for iter in 0..ROUNDS {
        booster.update_one_iter(iter, &dtrain)?;
    }
    println!("{}", booster.eval_one_iter(ROUNDS - 1, &[&dtrain], &["train"])?);

    let dtest = DMatrix::from_dense(&engine, &rows(), -1.0)?;
    let predictions = booster.predict(&dtest, PredictMask::NORMAL, 0)?;
    for (i, p) in predictions.iter().enumerate() {
        println!("prediction[{i}]={p:.2}");
    }

    for (i, tree) in booster.dump_model(None, true)?.iter().enumerate() {
        println!("model[{i}]={tree}");
    }
    Ok(())
}
