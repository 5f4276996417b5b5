//! boosters-xgboost: safe bindings to the XGBoost C API.
//!
//! The engine is loaded at runtime and driven through two kinds of opaque
//! handles. This crate takes care of handle lifetimes, moving buffers across
//! the C boundary and turning status codes plus the engine's last-error
//! message into typed errors. Training and inference themselves happen
//! entirely inside the engine.
//!
//! # Key Types
//!
//! - [`Engine`] / [`EngineConfig`] - Loading the shared library
//! - [`DMatrix`] - Dataset handle
//! - [`Booster`] - Model handle: parameters, training, prediction, persistence
//! - [`XgbError`] - Everything that can go wrong
//!
//! # Threading
//!
//! All calls into one [`Engine`] are serialized: the foreign call, the read of
//! the engine's last-error slot and the copy of any output buffer happen under
//! one lock. Handles are `Send + Sync`; mutating operations take `&mut self`.
//!
//! # Testing Without the Engine
//!
//! [`testing::fake`] provides an in-process engine with the same C ABI.

pub mod booster;
pub mod dmatrix;
pub mod engine;
pub mod error;
pub(crate) mod ffi;
pub(crate) mod marshal;
pub mod testing;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use booster::{dump_format, Booster, PredictMask};
pub use dmatrix::DMatrix;
pub use engine::{Engine, EngineConfig, LIBRARY_PATH_ENV};
pub use error::{HandleKind, Result, XgbError, UNKNOWN_ERROR};
