//! Dataset handles.
//!
//! A [`DMatrix`] owns exactly one engine dataset. It is created from dense
//! rows, an ndarray view or a file, carries named field vectors (labels,
//! weights, groups, base margins) and is freed either explicitly through
//! [`DMatrix::release`] or when dropped.
//!
//! Field vectors are not checked against the row count; the engine owns that
//! invariant and reports violations as [`XgbError::Native`].
//!
//! # Example
//!
//! ```no_run
//! use boosters_xgboost::{DMatrix, Engine};
//!
//! let engine = Engine::global()?;
//! let mut dtrain = DMatrix::from_dense(&engine, &[[1.0, 2.0], [3.0, 4.0]], f32::NAN)?;
//! dtrain.set_label(&[0.0, 1.0])?;
//! assert_eq!(dtrain.shape()?, (2, 2));
//! # Ok::<(), boosters_xgboost::XgbError>(())
//! ```

use std::borrow::Cow;
use std::ffi::{c_float, c_int, c_uint};
use std::fmt;
use std::path::Path;

use ndarray::ArrayView2;

use crate::engine::{Call, Engine};
use crate::error::{HandleKind, Result, XgbError};
use crate::ffi::{BstUlong, DMatrixHandle, Status};
use crate::marshal::{self, c_path, c_string, ensure_non_empty, ffi_len};

/// Field holding training targets.
pub const LABEL: &str = "label";
/// Field holding per-row weights.
pub const WEIGHT: &str = "weight";
/// Field holding per-row initial margins.
pub const BASE_MARGIN: &str = "base_margin";
/// Field accepting per-group row counts for ranking.
pub const GROUP: &str = "group";
/// Field reporting cumulative group boundaries.
pub const GROUP_PTR: &str = "group_ptr";

/// A dataset owned by the engine.
pub struct DMatrix {
    engine: Engine,
    handle: Option<DMatrixHandle>,
}

// SAFETY: the handle is only dereferenced by the engine, and every engine call
// is serialized by the engine lock.
unsafe impl Send for DMatrix {}
unsafe impl Sync for DMatrix {}

impl DMatrix {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a matrix from equal-length dense rows.
    ///
    /// `missing` marks absent values (commonly `f32::NAN`).
    pub fn from_dense<R: AsRef<[f32]>>(engine: &Engine, rows: &[R], missing: f32) -> Result<Self> {
        let (data, n_rows, n_cols) = marshal::flatten_rows(rows)?;
        Self::from_row_major(engine, &data, n_rows, n_cols, missing, None)
    }

    /// Like [`from_dense`](Self::from_dense), letting the engine use
    /// `n_threads` threads for construction (non-positive means all cores).
    pub fn from_dense_parallel<R: AsRef<[f32]>>(
        engine: &Engine,
        rows: &[R],
        missing: f32,
        n_threads: i32,
    ) -> Result<Self> {
        let (data, n_rows, n_cols) = marshal::flatten_rows(rows)?;
        Self::from_row_major(engine, &data, n_rows, n_cols, missing, Some(n_threads))
    }

    /// Create a matrix from a sample-major `[n_rows, n_cols]` array.
    pub fn from_array(engine: &Engine, data: ArrayView2<'_, f32>, missing: f32) -> Result<Self> {
        let (n_rows, n_cols) = data.dim();
        ensure_non_empty("dense matrix construction", n_rows)?;
        ensure_non_empty("dense matrix construction", n_cols)?;
        let flat: Cow<'_, [f32]> = match data.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(data.iter().copied().collect()),
        };
        Self::from_row_major(engine, &flat, n_rows, n_cols, missing, None)
    }

    /// Load a matrix from a file in any format the engine reads
    /// (LibSVM text, CSV with a format hint, or a [`save_binary`](Self::save_binary) cache).
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>, silent: bool) -> Result<Self> {
        let path = path.as_ref();
        let fname = c_path("matrix path", path)?;
        let matrix = Self::create(engine, |call, out| unsafe {
            (call.api().dmatrix_create_from_file)(fname.as_ptr(), c_int::from(silent), out)
        })?;
        tracing::debug!(path = %path.display(), "created DMatrix from file");
        Ok(matrix)
    }

    fn from_row_major(
        engine: &Engine,
        data: &[f32],
        n_rows: usize,
        n_cols: usize,
        missing: f32,
        n_threads: Option<i32>,
    ) -> Result<Self> {
        let rows = ffi_len("rows", n_rows)?;
        let cols = ffi_len("columns", n_cols)?;
        let ptr = data.as_ptr() as *const c_float;
        let matrix = Self::create(engine, |call, out| unsafe {
            match n_threads {
                Some(n) => (call.api().dmatrix_create_from_mat_omp)(ptr, rows, cols, missing, out, n),
                None => (call.api().dmatrix_create_from_mat)(ptr, rows, cols, missing, out),
            }
        })?;
        tracing::debug!(n_rows, n_cols, "created DMatrix from dense data");
        Ok(matrix)
    }

    fn create(
        engine: &Engine,
        f: impl FnOnce(&Call<'_>, *mut DMatrixHandle) -> Status,
    ) -> Result<Self> {
        let handle = engine.invoke(|call| {
            let mut out: DMatrixHandle = std::ptr::null_mut();
            call.check(f(call, &mut out))?;
            if out.is_null() {
                return Err(XgbError::NullOutput {
                    operation: "DMatrix construction",
                });
            }
            Ok(out)
        })?;
        Ok(Self {
            engine: engine.clone(),
            handle: Some(handle),
        })
    }

    // =========================================================================
    // Unsupported Sources
    // =========================================================================

    /// Compressed sparse row input is not supported.
    pub fn from_csr(
        _engine: &Engine,
        _indptr: &[usize],
        _indices: &[u32],
        _data: &[f32],
        _n_cols: usize,
    ) -> Result<Self> {
        Err(XgbError::Unsupported {
            name: "DMatrix from CSR",
        })
    }

    /// Compressed sparse column input is not supported.
    pub fn from_csc(
        _engine: &Engine,
        _col_ptr: &[usize],
        _indices: &[u32],
        _data: &[f32],
        _n_rows: usize,
    ) -> Result<Self> {
        Err(XgbError::Unsupported {
            name: "DMatrix from CSC",
        })
    }

    /// Streaming construction from a batch iterator is not supported.
    pub fn from_data_iter<I>(_engine: &Engine, _batches: I, _cache_prefix: &str) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<Vec<f32>>>,
    {
        Err(XgbError::Unsupported {
            name: "DMatrix from data iterator",
        })
    }

    /// Columnar (datatable) input is not supported.
    pub fn from_datatable(_engine: &Engine, _columns: &[&[f32]], _types: &[&str]) -> Result<Self> {
        Err(XgbError::Unsupported {
            name: "DMatrix from datatable",
        })
    }

    /// Row slicing is not supported.
    pub fn slice(&self, _rows: &[usize]) -> Result<Self> {
        Err(XgbError::Unsupported {
            name: "DMatrix slicing",
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The engine that owns this matrix.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns true once [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    fn handle(&self) -> Result<DMatrixHandle> {
        self.handle.ok_or(XgbError::Released {
            kind: HandleKind::DMatrix,
        })
    }

    /// The raw handle, checked to belong to `engine`.
    pub(crate) fn handle_for(&self, engine: &Engine, operation: &'static str) -> Result<DMatrixHandle> {
        let handle = self.handle()?;
        if !self.engine.same_as(engine) {
            return Err(XgbError::EngineMismatch { operation });
        }
        Ok(handle)
    }

    /// Number of rows, as reported by the engine.
    pub fn num_row(&self) -> Result<usize> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            let mut out: BstUlong = 0;
            call.check(unsafe { (call.api().dmatrix_num_row)(handle, &mut out) })?;
            marshal::host_len("row count", out)
        })
    }

    /// Number of columns, as reported by the engine.
    pub fn num_col(&self) -> Result<usize> {
        let handle = self.handle()?;
        self.engine.invoke(|call| {
            let mut out: BstUlong = 0;
            call.check(unsafe { (call.api().dmatrix_num_col)(handle, &mut out) })?;
            marshal::host_len("column count", out)
        })
    }

    /// `(num_row, num_col)`.
    pub fn shape(&self) -> Result<(usize, usize)> {
        Ok((self.num_row()?, self.num_col()?))
    }

    // =========================================================================
    // Field Vectors
    // =========================================================================

    /// Attach a float vector under `field`.
    pub fn set_float_info(&mut self, field: &str, values: &[f32]) -> Result<()> {
        let handle = self.handle()?;
        ensure_non_empty("set_float_info", values.len())?;
        let field_c = c_string("field name", field)?;
        let len = ffi_len("values", values.len())?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().dmatrix_set_float_info)(
                    handle,
                    field_c.as_ptr(),
                    values.as_ptr() as *const c_float,
                    len,
                )
            })
        })
    }

    /// Attach an unsigned vector under `field`.
    pub fn set_uint_info(&mut self, field: &str, values: &[u32]) -> Result<()> {
        let handle = self.handle()?;
        ensure_non_empty("set_uint_info", values.len())?;
        let field_c = c_string("field name", field)?;
        let len = ffi_len("values", values.len())?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().dmatrix_set_uint_info)(
                    handle,
                    field_c.as_ptr(),
                    values.as_ptr() as *const c_uint,
                    len,
                )
            })
        })
    }

    /// Set ranking groups as consecutive per-group row counts.
    pub fn set_group(&mut self, group_sizes: &[u32]) -> Result<()> {
        ensure_non_empty("set_group", group_sizes.len())?;
        self.set_uint_info(GROUP, group_sizes)
    }

    /// Shorthand for `set_float_info(LABEL, labels)`.
    pub fn set_label(&mut self, labels: &[f32]) -> Result<()> {
        self.set_float_info(LABEL, labels)
    }

    /// Shorthand for `set_float_info(WEIGHT, weights)`.
    pub fn set_weight(&mut self, weights: &[f32]) -> Result<()> {
        self.set_float_info(WEIGHT, weights)
    }

    /// Shorthand for `set_float_info(BASE_MARGIN, margin)`.
    pub fn set_base_margin(&mut self, margin: &[f32]) -> Result<()> {
        self.set_float_info(BASE_MARGIN, margin)
    }

    /// Copy of the float vector stored under `field`.
    ///
    /// A field that was never set comes back empty.
    pub fn get_float_info(&self, field: &str) -> Result<Vec<f32>> {
        let handle = self.handle()?;
        let field_c = c_string("field name", field)?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut ptr: *const c_float = std::ptr::null();
            call.check(unsafe {
                (call.api().dmatrix_get_float_info)(handle, field_c.as_ptr(), &mut len, &mut ptr)
            })?;
            unsafe { marshal::copy_slice("get_float_info", ptr, len) }
        })
    }

    /// Copy of the unsigned vector stored under `field`.
    pub fn get_uint_info(&self, field: &str) -> Result<Vec<u32>> {
        let handle = self.handle()?;
        let field_c = c_string("field name", field)?;
        self.engine.invoke(|call| {
            let mut len: BstUlong = 0;
            let mut ptr: *const c_uint = std::ptr::null();
            call.check(unsafe {
                (call.api().dmatrix_get_uint_info)(handle, field_c.as_ptr(), &mut len, &mut ptr)
            })?;
            unsafe { marshal::copy_slice("get_uint_info", ptr, len) }
        })
    }

    /// Shorthand for `get_float_info(LABEL)`.
    pub fn label(&self) -> Result<Vec<f32>> {
        self.get_float_info(LABEL)
    }

    // =========================================================================
    // Persistence & Lifecycle
    // =========================================================================

    /// Write the engine's binary cache of this matrix to `path`.
    pub fn save_binary(&self, path: impl AsRef<Path>, silent: bool) -> Result<()> {
        let handle = self.handle()?;
        let fname = c_path("matrix path", path.as_ref())?;
        self.engine.invoke(|call| {
            call.check(unsafe {
                (call.api().dmatrix_save_binary)(handle, fname.as_ptr(), c_int::from(silent))
            })
        })
    }

    /// Free the engine dataset.
    ///
    /// The handle is invalid afterwards, even if the engine reports an error.
    /// A second call fails with [`XgbError::Released`] without reaching the engine.
    pub fn release(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or(XgbError::Released {
            kind: HandleKind::DMatrix,
        })?;
        tracing::debug!("releasing DMatrix");
        self.engine
            .invoke(|call| call.check(unsafe { (call.api().dmatrix_free)(handle) }))
    }
}

impl Drop for DMatrix {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.release() {
                tracing::warn!(error = %err, "failed to free DMatrix on drop");
            }
        }
    }
}

impl fmt::Debug for DMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DMatrix")
            .field("engine", &self.engine)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::Api;
    use crate::testing::fake;
    use ndarray::array;

    unsafe extern "C" fn max_count(_: DMatrixHandle, out: *mut BstUlong) -> Status {
        *out = BstUlong::MAX;
        0
    }

    #[test]
    fn dense_shape_comes_from_engine() {
        let engine = fake::engine();
        let dm = DMatrix::from_dense(&engine, &[[1.0, 2.0], [3.0, 4.0]], -1.0).unwrap();
        assert_eq!(dm.num_row().unwrap(), 2);
        assert_eq!(dm.num_col().unwrap(), 2);
    }

    #[test]
    fn ragged_rows_never_reach_engine() {
        let engine = fake::engine();
        let before = fake::calls();
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![3.0]];
        let err = DMatrix::from_dense(&engine, &rows, -1.0).unwrap_err();
        assert!(matches!(err, XgbError::Shape { row_index: 1, .. }));
        assert_eq!(fake::calls(), before);
    }

    #[test]
    fn parallel_construction_matches_serial() {
        let engine = fake::engine();
        let rows = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let dm = DMatrix::from_dense_parallel(&engine, &rows, f32::NAN, 2).unwrap();
        assert_eq!(dm.shape().unwrap(), (2, 3));
    }

    #[test]
    fn array_view_in_any_layout() {
        let engine = fake::engine();
        let data = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let dm = DMatrix::from_array(&engine, data.view(), f32::NAN).unwrap();
        assert_eq!(dm.shape().unwrap(), (2, 3));

        let transposed = DMatrix::from_array(&engine, data.t(), f32::NAN).unwrap();
        assert_eq!(transposed.shape().unwrap(), (3, 2));
    }

    #[test]
    fn label_round_trip() {
        let engine = fake::engine();
        let mut dm = DMatrix::from_dense(&engine, &[[1.0, 2.0], [3.0, 4.0]], -1.0).unwrap();
        dm.set_label(&[123.0, 234.0]).unwrap();
        assert_eq!(dm.label().unwrap(), vec![123.0, 234.0]);
    }

    #[test]
    fn unset_field_is_empty() {
        let engine = fake::engine();
        let dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        assert!(dm.get_float_info(WEIGHT).unwrap().is_empty());
    }

    #[test]
    fn empty_field_vector_is_rejected_before_engine() {
        let engine = fake::engine();
        let mut dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        let before = fake::calls();
        assert!(matches!(
            dm.set_float_info(LABEL, &[]).unwrap_err(),
            XgbError::EmptyInput { .. }
        ));
        assert!(matches!(
            dm.set_uint_info("fold_index", &[]).unwrap_err(),
            XgbError::EmptyInput { .. }
        ));
        assert!(matches!(dm.set_group(&[]).unwrap_err(), XgbError::EmptyInput { .. }));
        assert_eq!(fake::calls(), before);
    }

    #[test]
    fn groups_become_boundaries() {
        let engine = fake::engine();
        let rows = vec![vec![0.0f32]; 5];
        let mut dm = DMatrix::from_dense(&engine, &rows, -1.0).unwrap();
        dm.set_group(&[2, 3]).unwrap();
        assert_eq!(dm.get_uint_info(GROUP_PTR).unwrap(), vec![0, 2, 5]);
    }

    #[test]
    fn unknown_field_surfaces_native_error() {
        let engine = fake::engine();
        let mut dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        let err = dm.set_float_info("no_such_field", &[1.0]).unwrap_err();
        assert!(err.is_native());
    }

    #[test]
    fn release_twice_is_rejected_on_host() {
        let engine = fake::engine();
        let mut dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        dm.release().unwrap();
        let before = fake::calls();
        assert!(matches!(
            dm.release().unwrap_err(),
            XgbError::Released {
                kind: HandleKind::DMatrix
            }
        ));
        assert!(matches!(dm.num_row().unwrap_err(), XgbError::Released { .. }));
        assert_eq!(fake::calls(), before);
    }

    #[test]
    fn drop_frees_live_handle() {
        let engine = fake::engine();
        let live = fake::live_handles();
        {
            let _dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
            assert_eq!(fake::live_handles(), live + 1);
        }
        assert_eq!(fake::live_handles(), live);
    }

    #[test]
    fn unsupported_sources_fail() {
        let engine = fake::engine();
        let dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        assert!(matches!(
            DMatrix::from_csr(&engine, &[0, 1], &[0], &[1.0], 1).unwrap_err(),
            XgbError::Unsupported { .. }
        ));
        assert!(matches!(
            DMatrix::from_csc(&engine, &[0, 1], &[0], &[1.0], 1).unwrap_err(),
            XgbError::Unsupported { .. }
        ));
        assert!(matches!(
            DMatrix::from_data_iter(&engine, Vec::new(), "cache").unwrap_err(),
            XgbError::Unsupported { .. }
        ));
        assert!(matches!(
            DMatrix::from_datatable(&engine, &[], &[]).unwrap_err(),
            XgbError::Unsupported { .. }
        ));
        assert!(matches!(dm.slice(&[0]).unwrap_err(), XgbError::Unsupported { .. }));
    }

    #[test]
    fn counts_wider_than_usize_are_rejected() {
        let api = Api {
            dmatrix_num_row: max_count,
            dmatrix_num_col: max_count,
            ..fake::api()
        };
        let engine = Engine::from_api(api, "wide counts");
        let dm = DMatrix::from_dense(&engine, &[[1.0]], -1.0).unwrap();
        match usize::try_from(BstUlong::MAX) {
            Ok(n) => assert_eq!(dm.shape().unwrap(), (n, n)),
            Err(_) => assert!(matches!(
                dm.num_row().unwrap_err(),
                XgbError::TooLarge {
                    what: "row count",
                    ..
                }
            )),
        }
    }
}
