//! Raw C ABI of the engine.
//!
//! The engine is resolved at runtime, so instead of an `extern` block the
//! entry points live in [`Api`], a table of function pointers filled from a
//! loaded [`Library`]. Nothing here is safe to call directly; all calls go
//! through [`Engine::invoke`](crate::engine::Engine::invoke).

use std::ffi::{c_char, c_float, c_int, c_uint, c_void};

use libloading::{Library, Symbol};

/// Unsigned length type used throughout the C API (`bst_ulong`).
pub type BstUlong = u64;

/// Opaque dataset handle.
pub type DMatrixHandle = *mut c_void;

/// Opaque model handle.
pub type BoosterHandle = *mut c_void;

/// Status code returned by every entry point. Zero means success.
pub type Status = c_int;

// =============================================================================
// Function Table
// =============================================================================

/// Entry points used by the binding.
///
/// Field names follow the C symbols with the `XGB`/`XG` prefix dropped.
#[derive(Clone, Copy)]
pub(crate) struct Api {
    pub(crate) get_last_error: unsafe extern "C" fn() -> *const c_char,

    pub(crate) dmatrix_create_from_file:
        unsafe extern "C" fn(*const c_char, c_int, *mut DMatrixHandle) -> Status,
    pub(crate) dmatrix_create_from_mat: unsafe extern "C" fn(
        *const c_float,
        BstUlong,
        BstUlong,
        c_float,
        *mut DMatrixHandle,
    ) -> Status,
    pub(crate) dmatrix_create_from_mat_omp: unsafe extern "C" fn(
        *const c_float,
        BstUlong,
        BstUlong,
        c_float,
        *mut DMatrixHandle,
        c_int,
    ) -> Status,
    pub(crate) dmatrix_free: unsafe extern "C" fn(DMatrixHandle) -> Status,
    pub(crate) dmatrix_save_binary:
        unsafe extern "C" fn(DMatrixHandle, *const c_char, c_int) -> Status,
    pub(crate) dmatrix_set_float_info:
        unsafe extern "C" fn(DMatrixHandle, *const c_char, *const c_float, BstUlong) -> Status,
    pub(crate) dmatrix_set_uint_info:
        unsafe extern "C" fn(DMatrixHandle, *const c_char, *const c_uint, BstUlong) -> Status,
    pub(crate) dmatrix_get_float_info: unsafe extern "C" fn(
        DMatrixHandle,
        *const c_char,
        *mut BstUlong,
        *mut *const c_float,
    ) -> Status,
    pub(crate) dmatrix_get_uint_info: unsafe extern "C" fn(
        DMatrixHandle,
        *const c_char,
        *mut BstUlong,
        *mut *const c_uint,
    ) -> Status,
    pub(crate) dmatrix_num_row: unsafe extern "C" fn(DMatrixHandle, *mut BstUlong) -> Status,
    pub(crate) dmatrix_num_col: unsafe extern "C" fn(DMatrixHandle, *mut BstUlong) -> Status,

    pub(crate) booster_create:
        unsafe extern "C" fn(*const DMatrixHandle, BstUlong, *mut BoosterHandle) -> Status,
    pub(crate) booster_free: unsafe extern "C" fn(BoosterHandle) -> Status,
    pub(crate) booster_set_param:
        unsafe extern "C" fn(BoosterHandle, *const c_char, *const c_char) -> Status,
    pub(crate) booster_update_one_iter:
        unsafe extern "C" fn(BoosterHandle, c_int, DMatrixHandle) -> Status,
    pub(crate) booster_boost_one_iter: unsafe extern "C" fn(
        BoosterHandle,
        DMatrixHandle,
        *mut c_float,
        *mut c_float,
        BstUlong,
    ) -> Status,
    pub(crate) booster_eval_one_iter: unsafe extern "C" fn(
        BoosterHandle,
        c_int,
        *mut DMatrixHandle,
        *mut *const c_char,
        BstUlong,
        *mut *const c_char,
    ) -> Status,
    pub(crate) booster_predict: unsafe extern "C" fn(
        BoosterHandle,
        DMatrixHandle,
        c_int,
        c_uint,
        c_int,
        *mut BstUlong,
        *mut *const c_float,
    ) -> Status,
    pub(crate) booster_load_model: unsafe extern "C" fn(BoosterHandle, *const c_char) -> Status,
    pub(crate) booster_save_model: unsafe extern "C" fn(BoosterHandle, *const c_char) -> Status,
    pub(crate) booster_load_model_from_buffer:
        unsafe extern "C" fn(BoosterHandle, *const c_void, BstUlong) -> Status,
    pub(crate) booster_get_model_raw:
        unsafe extern "C" fn(BoosterHandle, *mut BstUlong, *mut *const c_char) -> Status,
    pub(crate) booster_dump_model: unsafe extern "C" fn(
        BoosterHandle,
        *const c_char,
        c_int,
        *mut BstUlong,
        *mut *const *const c_char,
    ) -> Status,
    pub(crate) booster_dump_model_ex: unsafe extern "C" fn(
        BoosterHandle,
        *const c_char,
        c_int,
        *const c_char,
        *mut BstUlong,
        *mut *const *const c_char,
    ) -> Status,
    pub(crate) booster_dump_model_with_features: unsafe extern "C" fn(
        BoosterHandle,
        c_int,
        *const *const c_char,
        *const *const c_char,
        c_int,
        *mut BstUlong,
        *mut *const *const c_char,
    ) -> Status,
    pub(crate) booster_dump_model_ex_with_features: unsafe extern "C" fn(
        BoosterHandle,
        c_int,
        *const *const c_char,
        *const *const c_char,
        c_int,
        *const c_char,
        *mut BstUlong,
        *mut *const *const c_char,
    ) -> Status,
    pub(crate) booster_get_attr: unsafe extern "C" fn(
        BoosterHandle,
        *const c_char,
        *mut *const c_char,
        *mut c_int,
    ) -> Status,
    pub(crate) booster_set_attr:
        unsafe extern "C" fn(BoosterHandle, *const c_char, *const c_char) -> Status,
    pub(crate) booster_get_attr_names:
        unsafe extern "C" fn(BoosterHandle, *mut BstUlong, *mut *const *const c_char) -> Status,
    pub(crate) booster_load_rabit_checkpoint:
        unsafe extern "C" fn(BoosterHandle, *mut c_int) -> Status,
    pub(crate) booster_save_rabit_checkpoint: unsafe extern "C" fn(BoosterHandle) -> Status,
}

impl Api {
    /// Resolve every entry point from `lib`.
    ///
    /// # Safety
    ///
    /// `lib` must be an XGBoost build exposing the 1.x C API; the symbol types
    /// are not checked. The returned table must not outlive `lib`.
    pub(crate) unsafe fn load(lib: &Library) -> Result<Self, libloading::Error> {
        Ok(Self {
            get_last_error: symbol(lib, b"XGBGetLastError\0")?,
            dmatrix_create_from_file: symbol(lib, b"XGDMatrixCreateFromFile\0")?,
            dmatrix_create_from_mat: symbol(lib, b"XGDMatrixCreateFromMat\0")?,
            dmatrix_create_from_mat_omp: symbol(lib, b"XGDMatrixCreateFromMat_omp\0")?,
            dmatrix_free: symbol(lib, b"XGDMatrixFree\0")?,
            dmatrix_save_binary: symbol(lib, b"XGDMatrixSaveBinary\0")?,
            dmatrix_set_float_info: symbol(lib, b"XGDMatrixSetFloatInfo\0")?,
            dmatrix_set_uint_info: symbol(lib, b"XGDMatrixSetUIntInfo\0")?,
            dmatrix_get_float_info: symbol(lib, b"XGDMatrixGetFloatInfo\0")?,
            dmatrix_get_uint_info: symbol(lib, b"XGDMatrixGetUIntInfo\0")?,
            dmatrix_num_row: symbol(lib, b"XGDMatrixNumRow\0")?,
            dmatrix_num_col: symbol(lib, b"XGDMatrixNumCol\0")?,
            booster_create: symbol(lib, b"XGBoosterCreate\0")?,
            booster_free: symbol(lib, b"XGBoosterFree\0")?,
            booster_set_param: symbol(lib, b"XGBoosterSetParam\0")?,
            booster_update_one_iter: symbol(lib, b"XGBoosterUpdateOneIter\0")?,
            booster_boost_one_iter: symbol(lib, b"XGBoosterBoostOneIter\0")?,
            booster_eval_one_iter: symbol(lib, b"XGBoosterEvalOneIter\0")?,
            booster_predict: symbol(lib, b"XGBoosterPredict\0")?,
            booster_load_model: symbol(lib, b"XGBoosterLoadModel\0")?,
            booster_save_model: symbol(lib, b"XGBoosterSaveModel\0")?,
            booster_load_model_from_buffer: symbol(lib, b"XGBoosterLoadModelFromBuffer\0")?,
            booster_get_model_raw: symbol(lib, b"XGBoosterGetModelRaw\0")?,
            booster_dump_model: symbol(lib, b"XGBoosterDumpModel\0")?,
            booster_dump_model_ex: symbol(lib, b"XGBoosterDumpModelEx\0")?,
            booster_dump_model_with_features: symbol(lib, b"XGBoosterDumpModelWithFeatures\0")?,
            booster_dump_model_ex_with_features: symbol(
                lib,
                b"XGBoosterDumpModelExWithFeatures\0",
            )?,
            booster_get_attr: symbol(lib, b"XGBoosterGetAttr\0")?,
            booster_set_attr: symbol(lib, b"XGBoosterSetAttr\0")?,
            booster_get_attr_names: symbol(lib, b"XGBoosterGetAttrNames\0")?,
            booster_load_rabit_checkpoint: symbol(lib, b"XGBoosterLoadRabitCheckpoint\0")?,
            booster_save_rabit_checkpoint: symbol(lib, b"XGBoosterSaveRabitCheckpoint\0")?,
        })
    }
}

unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T, libloading::Error> {
    let sym: Symbol<'_, T> = lib.get(name)?;
    Ok(*sym)
}
