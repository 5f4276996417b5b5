//! Error types for engine calls and host-side validation.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Failures
//! reported by the native engine carry its status code and the message read
//! from its last-error slot; everything else is detected on the host before
//! the engine is contacted.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Message used when the engine fails without leaving a description.
pub const UNKNOWN_ERROR: &str = "unknown error";

// =============================================================================
// Handle Kind
// =============================================================================

/// The two kinds of engine-owned resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// A dataset handle ([`DMatrix`](crate::DMatrix)).
    DMatrix,
    /// A model handle ([`Booster`](crate::Booster)).
    Booster,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::DMatrix => f.write_str("DMatrix"),
            HandleKind::Booster => f.write_str("Booster"),
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by the binding.
#[derive(Debug, Error)]
pub enum XgbError {
    /// The engine returned a nonzero status code.
    #[error("xgboost call failed with status {code}: {message}")]
    Native { code: i32, message: String },

    /// Dense input rows do not all have the same length.
    #[error("row {row_index} has {actual_cols} columns, expected {expected_cols}")]
    Shape {
        expected_cols: usize,
        actual_cols: usize,
        row_index: usize,
    },

    /// A zero-length buffer was supplied where the engine needs data.
    #[error("{operation} requires non-empty input")]
    EmptyInput { operation: &'static str },

    /// Parallel inputs disagree in length.
    #[error("length mismatch for {field}: expected {expected}, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The handle was already released.
    #[error("{kind} handle has already been released")]
    Released { kind: HandleKind },

    /// The operation is not implemented by this binding.
    #[error("{name} is not supported")]
    Unsupported { name: &'static str },

    /// A string argument contains a NUL byte.
    #[error("{what} contains an interior NUL byte")]
    InteriorNul { what: &'static str },

    /// The engine reported output elements but returned a null pointer.
    #[error("{operation} returned a null output buffer")]
    NullOutput { operation: &'static str },

    /// Handles created by different engine instances were combined.
    #[error("{operation} mixes handles from different engine instances")]
    EngineMismatch { operation: &'static str },

    /// A length does not fit the integer type the engine expects.
    #[error("{what} has {len} elements, more than the engine accepts")]
    TooLarge { what: &'static str, len: usize },

    /// The shared library or one of its symbols could not be loaded.
    #[error("failed to load xgboost from {path}: {source}")]
    EngineLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

impl XgbError {
    /// Build a native failure, substituting [`UNKNOWN_ERROR`] for an empty message.
    pub fn native(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        };
        XgbError::Native { code, message }
    }

    /// Returns true if this error was reported by the engine.
    pub fn is_native(&self) -> bool {
        matches!(self, XgbError::Native { .. })
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, XgbError>;
