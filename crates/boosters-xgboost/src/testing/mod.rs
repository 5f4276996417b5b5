//! Test support shared by unit tests, integration tests and examples.
//!
//! - [`fake`]: an in-process engine exposing the same C ABI as XGBoost
//! - [`data`]: small deterministic datasets and the pinned training setup

pub mod data;
pub mod fake;
