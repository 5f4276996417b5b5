//! Model handles.
//!
//! A [`Booster`] owns one engine model together with its parameters and
//! attributes. It is created over the matrices the engine should be able to
//! index during evaluation; the borrow checker keeps those matrices alive
//! (and unreleased) for as long as the booster exists.
//!
//! # Lifecycle
//!
//! Parameters and attributes may be set at any point, training calls may be
//! interleaved with prediction, evaluation, dumping and persistence, and
//! [`Booster::release`] is terminal: every later call fails with
//! [`XgbError::Released`] without reaching the engine.
//!
//! # Example
//!
//! ```no_run
//! use boosters_xgboost::{Booster, DMatrix, Engine, PredictMask};
//!
//! let engine = Engine::global()?;
//! let mut dtrain = DMatrix::from_dense(&engine, &[[1.0, 2.0], [3.0, 4.0]], f32::NAN)?;
//! dtrain.set_label(&[0.0, 1.0])?;
//!
//! let mut booster = Booster::new(&engine, &[&dtrain])?;
//! booster.set_params([("objective", "reg:squarederror"), ("eta", "0.1")])?;
//! for iter in 0..10 {
//!     booster.update_one_iter(iter, &dtrain)?;
//! }
//! let preds = booster.predict(&dtrain, PredictMask::NORMAL, 0)?;
//! # Ok::<(), boosters_xgboost::XgbError>(())
//! ```

use std::collections::BTreeMap;
use std::ffi::{c_char, c_float, c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::ops::BitOr;
use std::path::Path;

use crate::dmatrix::DMatrix;
use crate::engine::Engine;
use crate::error::{HandleKind, Result, XgbError};
use crate::ffi::{BoosterHandle, BstUlong, DMatrixHandle};
use crate::marshal::{
    self, c_path, c_string, ensure_non_empty, ensure_same_len, ffi_int, ffi_len, CStrArray,
};

/// Dump format names understood by the engine.
pub mod dump_format {
    /// Plain text, one line per node.
    pub const TEXT: &str = "text";
    /// One JSON document per tree.
    pub const JSON: &str = "json";
}

// =============================================================================
// PredictMask
// =============================================================================

/// Bit set selecting the prediction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PredictMask(i32);

impl PredictMask {
    /// Transformed predictions, one value per row and output group.
    pub const NORMAL: Self = Self(0);
    /// Untransformed margins.
    pub const OUTPUT_MARGIN: Self = Self(1);
    /// Leaf index reached in every tree.
    pub const LEAF: Self = Self(1 << 1);
    /// Per-feature contributions plus bias.
    pub const CONTRIBS: Self = Self(1 << 2);
    /// Approximate contributions (requires `CONTRIBS`).
    pub const APPROX_CONTRIBS: Self = Self(1 << 3);
    /// Pairwise feature interactions.
    pub const INTERACTIONS: Self = Self(1 << 4);

    /// Create a mask from raw bits.
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Raw bits passed to the engine.
    pub const fn bits(self) -> i32 {
        self.0
    }

    /// Check whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for PredictMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// =============================================================================
// Booster
// =============================================================================

/// A model owned by the engine.
///
/// `'m` is the lifetime of the matrices passed to [`Booster::new`].
pub struct Booster<'m> {
    engine: Engine,
    handle: Option<BoosterHandle>,
    params: BTreeMap<String, String>,
    _matrices: PhantomData<&'m DMatrix>,
}

// SAFETY: the handle is only dereferenced by the engine, and every engine call
// is serialized by the engine lock.
unsafe impl Send for Booster<'_> {}
unsafe impl Sync for Booster<'_> {}

impl<'m> Booster<'m> {
    /// Create a booster that may refer to `matrices` during evaluation.
    ///
    /// Pass no matrices to create an empty model, e.g. before
    /// [`load_model`](Self::load_model).
    pub fn new(engine: &Engine, matrices: &[&'m DMatrix]) -> Result<Self> {
        let handles = matrices
            .iter()
            .map(|m| m.handle_for(engine, "Booster::new"))
            .collect::<Result<Vec<DMatrixHandle>>>()?;
        let len = ffi_len("matrices", handles.len())?;
        let dmats = if handles.is_empty() {
            std::ptr::null()
        } else {
            handles.as_ptr()
        };
        let handle = engine.invoke(|call| {
            let mut out: BoosterHandle = std::ptr::null_mut();
            call.check(unsafe { (call.api().booster_create)(dmats, len, &mut out) })?;
            if out.is_null() {
                return Err(XgbError::NullOutput {
                    operation: "Booster construction",
                });
            }
            Ok(out)
        })?;
        tracing::debug!(n_matrices = matrices.len(), "created Booster");
        Ok(Self {
            engine: engine.clone(),
            handle: Some(handle),
            params: BTreeMap::new(),
            _matrices: PhantomData,
        })
    }

    /// The engine that owns this model.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns true once [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    fn handle(&self) -> Result<BoosterHandle> {
        self.handle.ok_or(XgbError::Released {
            kind: HandleKind::Booster,
        })
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Set one parameter. The engine validates name and value.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        let handle = self.handle()?;
        let name_c = c_string("parameter name", name)?;
        let value_c = c_string("parameter value", value)?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_set_param)(handle, name_c.as_ptr(), value_c.as_ptr())
            })
        })?;
        self.params.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Set parameters in order, stopping at the first failure.
    pub fn set_params<I, K, V>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in params {
            self.set_param(name.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Reset a parameter to the engine default.
    pub fn delete_param(&mut self, name: &str) -> Result<()> {
        let handle = self.handle()?;
        let name_c = c_string("parameter name", name)?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_set_param)(handle, name_c.as_ptr(), std::ptr::null())
            })
        })?;
        self.params.remove(name);
        Ok(())
    }

    /// Parameters successfully set through this handle, last write per name.
    ///
    /// Parameters restored by [`load_model`](Self::load_model) are not listed.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    // =========================================================================
    // Training
    // =========================================================================

    /// Run one boosting round with the configured objective.
    pub fn update_one_iter(&mut self, iter: i32, dtrain: &DMatrix) -> Result<()> {
        let handle = self.handle()?;
        let dtrain = dtrain.handle_for(&self.engine, "update_one_iter")?;
        tracing::trace!(iter, "boosting round");
        self.engine.invoke(|call| {
            call.check(unsafe { (call.api().booster_update_one_iter)(handle, iter, dtrain) })
        })
    }

    /// Run one boosting round from caller-supplied gradients.
    ///
    /// `grad` and `hess` must both have one entry per row of `dtrain`.
    pub fn boost_one_iter(&mut self, dtrain: &DMatrix, grad: &[f32], hess: &[f32]) -> Result<()> {
        ensure_same_len("hess", grad.len(), hess.len())?;
        ensure_non_empty("boost_one_iter", grad.len())?;
        let handle = self.handle()?;
        let dtrain_handle = dtrain.handle_for(&self.engine, "boost_one_iter")?;
        ensure_same_len("grad", dtrain.num_row()?, grad.len())?;

        let len = ffi_len("grad", grad.len())?;
        // The entry point takes non-const pointers.
        let mut grad = grad.to_vec();
        let mut hess = hess.to_vec();
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_boost_one_iter)(
                    handle,
                    dtrain_handle,
                    grad.as_mut_ptr() as *mut c_float,
                    hess.as_mut_ptr() as *mut c_float,
                    len,
                )
            })
        })
    }

    /// Evaluate on `matrices`, labelled pairwise by `names`.
    ///
    /// Returns the engine's report, e.g. `"[3]\ttrain-rmse:0.41\teval-rmse:0.52"`.
    pub fn eval_one_iter<S: AsRef<str>>(
        &self,
        iter: i32,
        matrices: &[&DMatrix],
        names: &[S],
    ) -> Result<String> {
        ensure_same_len("eval names", matrices.len(), names.len())?;
        ensure_non_empty("eval_one_iter", matrices.len())?;
        let handle = self.handle()?;
        let mut handles = matrices
            .iter()
            .map(|m| m.handle_for(&self.engine, "eval_one_iter"))
            .collect::<Result<Vec<DMatrixHandle>>>()?;
        let mut names_c = CStrArray::new("eval name", names)?;
        let len = ffi_len("matrices", handles.len())?;
        self.engine.invoke(|call| {
            let mut out: *const c_char = std::ptr::null();
            call.check(unsafe {
                (call.api().booster_eval_one_iter)(
                    handle,
                    iter,
                    handles.as_mut_ptr(),
                    names_c.as_mut_ptr(),
                    len,
                    &mut out,
                )
            })?;
            unsafe { marshal::copy_string("eval_one_iter", out) }
        })
    }

    // =========================================================================
    // Prediction
    // =========================================================================

    /// Predict on `dmat`.
    ///
    /// `tree_limit` bounds the number of trees used (0 = all). The output
    /// length depends on `mask` and the model (e.g. rows × classes for
    /// multiclass, rows × trees for [`PredictMask::LEAF`]).
    pub fn predict(&self, dmat: &DMatrix, mask: PredictMask, tree_limit: u32) -> Result<Vec<f32>> {
        let handle = self.handle()?;
        let dmat = dmat.handle_for(&self.engine, "predict")?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const c_float = std::ptr::null();
            call.check(unsafe {
                (call.api().booster_predict)(
                    handle,
                    dmat,
                    mask.bits(),
                    tree_limit,
                    0,
                    &mut len,
                    &mut out,
                )
            })?;
            unsafe { marshal::copy_slice("predict", out, len) }
        })
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Replace the model with the one stored at `path`.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let handle = self.handle()?;
        let fname = c_path("model path", path.as_ref())?;
        self.engine.invoke(|call| {
            call.check(unsafe { (call.api().booster_load_model)(handle, fname.as_ptr()) })
        })
    }

    /// Write the model to `path`.
    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<()> {
        let handle = self.handle()?;
        let fname = c_path("model path", path.as_ref())?;
        self.engine.invoke(|call| {
            call.check(unsafe { (call.api().booster_save_model)(handle, fname.as_ptr()) })
        })
    }

    /// Replace the model with one serialized by [`model_raw`](Self::model_raw).
    pub fn load_model_from_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        ensure_non_empty("load_model_from_buffer", bytes.len())?;
        let handle = self.handle()?;
        let len = ffi_len("model buffer", bytes.len())?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_load_model_from_buffer)(
                    handle,
                    bytes.as_ptr() as *const c_void,
                    len,
                )
            })
        })
    }

    /// The serialized model, byte for byte as the engine produced it.
    pub fn model_raw(&self) -> Result<Vec<u8>> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const c_char = std::ptr::null();
            call.check(unsafe { (call.api().booster_get_model_raw)(handle, &mut len, &mut out) })?;
            unsafe { marshal::copy_slice("model_raw", out as *const u8, len) }
        })
    }

    /// Save a checkpoint through the distributed synchronization layer.
    pub fn save_rabit_checkpoint(&self) -> Result<()> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            call.check(unsafe { (call.api().booster_save_rabit_checkpoint)(handle) })
        })
    }

    /// Load the latest checkpoint. Returns the version the engine reports.
    pub fn load_rabit_checkpoint(&mut self, version: i32) -> Result<i32> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            let mut version: c_int = version;
            call.check(unsafe {
                (call.api().booster_load_rabit_checkpoint)(handle, &mut version)
            })?;
            Ok(version)
        })
    }

    // =========================================================================
    // Dumping
    // =========================================================================

    /// Text dump of every tree, naming features from an optional feature map file.
    pub fn dump_model(&self, fmap: Option<&Path>, with_stats: bool) -> Result<Vec<String>> {
        let handle = self.handle()?;
        let fmap_c = fmap_c_string(fmap)?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const *const c_char = std::ptr::null();
            call.check(unsafe {
                (call.api().booster_dump_model)(
                    handle,
                    fmap_c.as_ptr(),
                    c_int::from(with_stats),
                    &mut len,
                    &mut out,
                )
            })?;
            unsafe { marshal::copy_strings("dump_model", out, len) }
        })
    }

    /// Like [`dump_model`](Self::dump_model) in the given
    /// [`dump_format`] (passed to the engine unchanged).
    pub fn dump_model_ex(
        &self,
        fmap: Option<&Path>,
        with_stats: bool,
        format: &str,
    ) -> Result<Vec<String>> {
        let handle = self.handle()?;
        let fmap_c = fmap_c_string(fmap)?;
        let format_c = c_string("dump format", format)?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const *const c_char = std::ptr::null();
            call.check(unsafe {
                (call.api().booster_dump_model_ex)(
                    handle,
                    fmap_c.as_ptr(),
                    c_int::from(with_stats),
                    format_c.as_ptr(),
                    &mut len,
                    &mut out,
                )
            })?;
            unsafe { marshal::copy_strings("dump_model_ex", out, len) }
        })
    }

    /// Text dump naming features explicitly.
    ///
    /// `feature_types` uses the engine's codes (`q` quantitative, `i`
    /// indicator, `int` integer). The two slices must have the same length,
    /// which is checked here. Whether that length matches the model's feature
    /// count (including an empty list) is left to the engine, which reports a
    /// mismatch as [`XgbError::Native`].
    pub fn dump_model_with_features<S: AsRef<str>>(
        &self,
        feature_names: &[S],
        feature_types: &[S],
        with_stats: bool,
    ) -> Result<Vec<String>> {
        self.dump_with_features(feature_names, feature_types, with_stats, None)
    }

    /// Like [`dump_model_with_features`](Self::dump_model_with_features) in
    /// the given [`dump_format`].
    pub fn dump_model_ex_with_features<S: AsRef<str>>(
        &self,
        feature_names: &[S],
        feature_types: &[S],
        with_stats: bool,
        format: &str,
    ) -> Result<Vec<String>> {
        self.dump_with_features(feature_names, feature_types, with_stats, Some(format))
    }

    fn dump_with_features<S: AsRef<str>>(
        &self,
        feature_names: &[S],
        feature_types: &[S],
        with_stats: bool,
        format: Option<&str>,
    ) -> Result<Vec<String>> {
        ensure_same_len("feature types", feature_names.len(), feature_types.len())?;
        let handle = self.handle()?;
        let names_c = CStrArray::new("feature name", feature_names)?;
        let types_c = CStrArray::new("feature type", feature_types)?;
        let fnum = ffi_int("feature names", names_c.len())?;
        let format_c = format.map(|f| c_string("dump format", f)).transpose()?;
        let with_stats = c_int::from(with_stats);

        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const *const c_char = std::ptr::null();
            let status = match &format_c {
                Some(format_c) => unsafe {
                    (call.api().booster_dump_model_ex_with_features)(
                        handle,
                        fnum,
                        names_c.as_ptr(),
                        types_c.as_ptr(),
                        with_stats,
                        format_c.as_ptr(),
                        &mut len,
                        &mut out,
                    )
                },
                None => unsafe {
                    (call.api().booster_dump_model_with_features)(
                        handle,
                        fnum,
                        names_c.as_ptr(),
                        types_c.as_ptr(),
                        with_stats,
                        &mut len,
                        &mut out,
                    )
                },
            };
            call.check(status)?;
            unsafe { marshal::copy_strings("dump with features", out, len) }
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Value stored under `key`, or `None` when the key is absent.
    ///
    /// An attribute set to the empty string is returned as `Some("")`.
    pub fn get_attr(&self, key: &str) -> Result<Option<String>> {
        let handle = self.handle()?;
        let key_c = c_string("attribute key", key)?;
        self.engine.invoke(|call| {
            let mut out: *const c_char = std::ptr::null();
            let mut success: c_int = 0;
            call.check(unsafe {
                (call.api().booster_get_attr)(handle, key_c.as_ptr(), &mut out, &mut success)
            })?;
            if success == 0 {
                return Ok(None);
            }
            unsafe { marshal::copy_string("get_attr", out) }.map(Some)
        })
    }

    /// Store `value` under `key`. Attributes are saved with the model.
    pub fn set_attr(&mut self, key: &str, value: &str) -> Result<()> {
        let handle = self.handle()?;
        let key_c = c_string("attribute key", key)?;
        let value_c = c_string("attribute value", value)?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_set_attr)(handle, key_c.as_ptr(), value_c.as_ptr())
            })
        })
    }

    /// Remove `key` from the attribute store.
    pub fn delete_attr(&mut self, key: &str) -> Result<()> {
        let handle = self.handle()?;
        let key_c = c_string("attribute key", key)?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().booster_set_attr)(handle, key_c.as_ptr(), std::ptr::null())
            })
        })
    }

    /// Names of all stored attributes.
    pub fn attr_names(&self) -> Result<Vec<String>> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut out: *const *const c_char = std::ptr::null();
            call.check(unsafe { (call.api().booster_get_attr_names)(handle, &mut len, &mut out) })?;
            unsafe { marshal::copy_strings("attr_names", out, len) }
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Free the engine model.
    ///
    /// Terminal: a second call, or any other call afterwards, fails with
    /// [`XgbError::Released`] without reaching the engine.
    pub fn release(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or(XgbError::Released {
            kind: HandleKind::Booster,
        })?;
        tracing::debug!("releasing Booster");
        self.engine
            .invoke(|call| call.check(unsafe { (call.api().booster_free)(handle) }))
    }
}

fn fmap_c_string(fmap: Option<&Path>) -> Result<std::ffi::CString> {
    match fmap {
        Some(path) => c_path("feature map path", path),
        None => c_string("feature map path", ""),
    }
}

impl Drop for Booster<'_> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.release() {
                tracing::warn!(error = %err, "failed to free Booster on drop");
            }
        }
    }
}

impl fmt::Debug for Booster<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booster")
            .field("engine", &self.engine)
            .field("released", &self.is_released())
            .field("params", &self.params)
            .finish()
    }
}
