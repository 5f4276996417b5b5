//! An in-process engine with the same C ABI as XGBoost.
//!
//! The model is deliberately trivial: every boosting round adds one constant,
//! fitted to the mean residual (`update_one_iter`) or to the Newton step of
//! the supplied gradients (`boost_one_iter`). What matters is that handles,
//! output buffers, status codes and the last-error slot behave the way the
//! native engine's do, so the binding can be tested without it.
//!
//! The last-error slot and the call counters are thread-local, like the
//! native engine's error slot, so tests running in parallel do not interfere.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_float, c_int, c_uint, c_void, CStr, CString};

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::ffi::{Api, BoosterHandle, BstUlong, DMatrixHandle, Status};

const MATRIX_MAGIC: &[u8; 8] = b"FAKEDMX1";
const MODEL_MAGIC: &[u8; 8] = b"FAKEBST1";
const DEFAULT_ETA: f32 = 0.3;

const FLOAT_FIELDS: &[&str] = &[
    "label",
    "weight",
    "base_margin",
    "label_lower_bound",
    "label_upper_bound",
];

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
    static CALLS: Cell<usize> = const { Cell::new(0) };
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// A fresh engine instance backed by the fake.
pub fn engine() -> Engine {
    Engine::from_api(api(), "fake")
}

/// Engine entry points invoked on this thread so far (error reads excluded).
pub fn calls() -> usize {
    CALLS.with(Cell::get)
}

/// Handles created on this thread and not yet freed.
pub fn live_handles() -> usize {
    LIVE.with(Cell::get)
}

pub(crate) fn api() -> Api {
    Api {
        get_last_error,
        dmatrix_create_from_file,
        dmatrix_create_from_mat,
        dmatrix_create_from_mat_omp,
        dmatrix_free,
        dmatrix_save_binary,
        dmatrix_set_float_info,
        dmatrix_set_uint_info,
        dmatrix_get_float_info,
        dmatrix_get_uint_info,
        dmatrix_num_row,
        dmatrix_num_col,
        booster_create,
        booster_free,
        booster_set_param,
        booster_update_one_iter,
        booster_boost_one_iter,
        booster_eval_one_iter,
        booster_predict,
        booster_load_model,
        booster_save_model,
        booster_load_model_from_buffer,
        booster_get_model_raw,
        booster_dump_model,
        booster_dump_model_ex,
        booster_dump_model_with_features,
        booster_dump_model_ex_with_features,
        booster_get_attr,
        booster_set_attr,
        booster_get_attr_names,
        booster_load_rabit_checkpoint,
        booster_save_rabit_checkpoint,
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Serialize, Deserialize)]
struct FakeMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f32>,
    floats: HashMap<String, Vec<f32>>,
    uints: HashMap<String, Vec<u32>>,
}

/// The persisted part of a [`FakeBooster`].
#[derive(Serialize, Deserialize)]
struct ModelSnapshot {
    n_features: usize,
    rounds: Vec<f32>,
    attrs: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeBooster {
    params: BTreeMap<String, String>,
    attrs: BTreeMap<String, String>,
    rounds: Vec<f32>,
    n_features: usize,
    checkpoint: Option<Vec<u8>>,
    version: c_int,
    // Output buffers, valid until the next call on this booster.
    predictions: Vec<f32>,
    raw: Vec<u8>,
    text: CString,
    strings: Vec<CString>,
    string_ptrs: Vec<*const c_char>,
}

impl FakeBooster {
    fn eta(&self) -> f32 {
        self.params
            .get("eta")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ETA)
    }

    fn margin(&self, tree_limit: usize) -> f32 {
        let n = if tree_limit == 0 {
            self.rounds.len()
        } else {
            tree_limit.min(self.rounds.len())
        };
        self.rounds[..n].iter().sum()
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        let snapshot = ModelSnapshot {
            n_features: self.n_features,
            rounds: self.rounds.clone(),
            attrs: self.attrs.clone(),
        };
        encode_with_magic(MODEL_MAGIC, &snapshot)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), String> {
        let snapshot: ModelSnapshot = decode_with_magic(MODEL_MAGIC, bytes)
            .map_err(|e| format!("invalid model format: {e}"))?;
        self.n_features = snapshot.n_features;
        self.rounds = snapshot.rounds;
        self.attrs = snapshot.attrs;
        Ok(())
    }

    fn set_strings(&mut self, strings: Vec<String>) -> Result<(), String> {
        self.strings = strings
            .into_iter()
            .map(|s| CString::new(s).map_err(|e| e.to_string()))
            .collect::<Result<_, _>>()?;
        self.string_ptrs = self.strings.iter().map(|s| s.as_ptr()).collect();
        Ok(())
    }

    fn dump(&mut self, with_stats: bool, format: &str, names: Option<&[String]>) -> Result<(), String> {
        let feature = names
            .and_then(|n| n.first().cloned())
            .unwrap_or_else(|| "f0".to_string());
        let dumps = self
            .rounds
            .iter()
            .map(|leaf| match format {
                "text" if with_stats => Ok(format!("0:leaf={leaf},cover=0 # {feature}\n")),
                "text" => Ok(format!("0:leaf={leaf}\n")),
                "json" if with_stats => Ok(format!("{{ \"nodeid\": 0, \"leaf\": {leaf}, \"cover\": 0 }}")),
                "json" => Ok(format!("{{ \"nodeid\": 0, \"leaf\": {leaf} }}")),
                other => Err(format!("Unknown dump format: {other}")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.set_strings(dumps)
    }
}

fn encode_with_magic<T: Serialize>(magic: &[u8; 8], value: &T) -> Result<Vec<u8>, String> {
    let payload = postcard::to_allocvec(value).map_err(|e| e.to_string())?;
    let mut out = Vec::with_capacity(magic.len() + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode_with_magic<T: for<'de> Deserialize<'de>>(magic: &[u8; 8], bytes: &[u8]) -> Result<T, String> {
    let payload = bytes
        .strip_prefix(magic.as_slice())
        .ok_or_else(|| "bad magic".to_string())?;
    let (value, rest) = postcard::take_from_bytes(payload).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes", rest.len()));
    }
    Ok(value)
}

// =============================================================================
// Plumbing
// =============================================================================

fn guarded(f: impl FnOnce() -> Result<(), String>) -> Status {
    CALLS.with(|c| c.set(c.get() + 1));
    match f() {
        Ok(()) => 0,
        Err(message) => {
            let message = CString::new(message).unwrap_or_default();
            LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
            -1
        }
    }
}

fn into_handle<T>(value: T) -> *mut c_void {
    LIVE.with(|c| c.set(c.get() + 1));
    Box::into_raw(Box::new(value)) as *mut c_void
}

unsafe fn free_handle<T>(handle: *mut c_void) -> Result<(), String> {
    if handle.is_null() {
        return Err("handle is null".to_string());
    }
    drop(Box::from_raw(handle as *mut T));
    LIVE.with(|c| c.set(c.get().saturating_sub(1)));
    Ok(())
}

unsafe fn matrix<'a>(handle: DMatrixHandle) -> Result<&'a mut FakeMatrix, String> {
    (handle as *mut FakeMatrix)
        .as_mut()
        .ok_or_else(|| "DMatrix handle is null".to_string())
}

unsafe fn booster<'a>(handle: BoosterHandle) -> Result<&'a mut FakeBooster, String> {
    (handle as *mut FakeBooster)
        .as_mut()
        .ok_or_else(|| "Booster handle is null".to_string())
}

unsafe fn string_arg(ptr: *const c_char, what: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

unsafe fn string_array(ptr: *const *const c_char, len: usize) -> Result<Vec<String>, String> {
    if len > 0 && ptr.is_null() {
        return Err("string array is null".to_string());
    }
    (0..len).map(|i| string_arg(*ptr.add(i), "string")).collect()
}

fn read_matrix_file(path: &str) -> Result<FakeMatrix, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    let m: FakeMatrix = decode_with_magic(MATRIX_MAGIC, &bytes)
        .map_err(|e| format!("{path} is not a matrix file: {e}"))?;
    if m.data.len() != m.n_rows * m.n_cols {
        return Err(format!("{path}: data does not match shape"));
    }
    Ok(m)
}

// =============================================================================
// Entry Points: errors and matrices
// =============================================================================

unsafe extern "C" fn get_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

unsafe extern "C" fn dmatrix_create_from_file(
    fname: *const c_char,
    _silent: c_int,
    out: *mut DMatrixHandle,
) -> Status {
    guarded(|| {
        let path = string_arg(fname, "file name")?;
        let m = read_matrix_file(&path)?;
        *out = into_handle(m);
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_create_from_mat(
    data: *const c_float,
    nrow: BstUlong,
    ncol: BstUlong,
    _missing: c_float,
    out: *mut DMatrixHandle,
) -> Status {
    guarded(|| {
        if data.is_null() || out.is_null() {
            return Err("null argument".to_string());
        }
        let (n_rows, n_cols) = (nrow as usize, ncol as usize);
        let data = std::slice::from_raw_parts(data, n_rows * n_cols).to_vec();
        *out = into_handle(FakeMatrix {
            n_rows,
            n_cols,
            data,
            floats: HashMap::new(),
            uints: HashMap::new(),
        });
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_create_from_mat_omp(
    data: *const c_float,
    nrow: BstUlong,
    ncol: BstUlong,
    missing: c_float,
    out: *mut DMatrixHandle,
    _nthread: c_int,
) -> Status {
    dmatrix_create_from_mat(data, nrow, ncol, missing, out)
}

unsafe extern "C" fn dmatrix_free(handle: DMatrixHandle) -> Status {
    guarded(|| free_handle::<FakeMatrix>(handle))
}

unsafe extern "C" fn dmatrix_save_binary(
    handle: DMatrixHandle,
    fname: *const c_char,
    _silent: c_int,
) -> Status {
    guarded(|| {
        let m = matrix(handle)?;
        let path = string_arg(fname, "file name")?;
        let bytes = encode_with_magic(MATRIX_MAGIC, &*m)?;
        std::fs::write(&path, bytes).map_err(|e| format!("failed to write {path}: {e}"))
    })
}

unsafe extern "C" fn dmatrix_set_float_info(
    handle: DMatrixHandle,
    field: *const c_char,
    array: *const c_float,
    len: BstUlong,
) -> Status {
    guarded(|| {
        let m = matrix(handle)?;
        let field = string_arg(field, "field")?;
        if !FLOAT_FIELDS.contains(&field.as_str()) {
            return Err(format!("Unknown float field name: {field}"));
        }
        if array.is_null() {
            return Err("array is null".to_string());
        }
        let values = std::slice::from_raw_parts(array, len as usize).to_vec();
        m.floats.insert(field, values);
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_set_uint_info(
    handle: DMatrixHandle,
    field: *const c_char,
    array: *const c_uint,
    len: BstUlong,
) -> Status {
    guarded(|| {
        let m = matrix(handle)?;
        let field = string_arg(field, "field")?;
        if array.is_null() {
            return Err("array is null".to_string());
        }
        let values = std::slice::from_raw_parts(array, len as usize);
        match field.as_str() {
            "group" => {
                let mut ptr = Vec::with_capacity(values.len() + 1);
                ptr.push(0u32);
                let mut total = 0u32;
                for &size in values {
                    total += size;
                    ptr.push(total);
                }
                if total as usize != m.n_rows {
                    return Err(format!(
                        "group sizes sum to {total}, matrix has {} rows",
                        m.n_rows
                    ));
                }
                m.uints.insert("group_ptr".to_string(), ptr);
            }
            "fold_index" => {
                m.uints.insert(field, values.to_vec());
            }
            _ => return Err(format!("Unknown uint field name: {field}")),
        }
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_get_float_info(
    handle: DMatrixHandle,
    field: *const c_char,
    out_len: *mut BstUlong,
    out_dptr: *mut *const c_float,
) -> Status {
    guarded(|| {
        let m = matrix(handle)?;
        let field = string_arg(field, "field")?;
        if !FLOAT_FIELDS.contains(&field.as_str()) {
            return Err(format!("Unknown float field name: {field}"));
        }
        match m.floats.get(&field) {
            Some(v) => {
                *out_len = v.len() as BstUlong;
                *out_dptr = v.as_ptr();
            }
            None => {
                *out_len = 0;
                *out_dptr = std::ptr::null();
            }
        }
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_get_uint_info(
    handle: DMatrixHandle,
    field: *const c_char,
    out_len: *mut BstUlong,
    out_dptr: *mut *const c_uint,
) -> Status {
    guarded(|| {
        let m = matrix(handle)?;
        let field = string_arg(field, "field")?;
        match m.uints.get(&field) {
            Some(v) => {
                *out_len = v.len() as BstUlong;
                *out_dptr = v.as_ptr();
            }
            None => {
                *out_len = 0;
                *out_dptr = std::ptr::null();
            }
        }
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_num_row(handle: DMatrixHandle, out: *mut BstUlong) -> Status {
    guarded(|| {
        *out = matrix(handle)?.n_rows as BstUlong;
        Ok(())
    })
}

unsafe extern "C" fn dmatrix_num_col(handle: DMatrixHandle, out: *mut BstUlong) -> Status {
    guarded(|| {
        *out = matrix(handle)?.n_cols as BstUlong;
        Ok(())
    })
}

// =============================================================================
// Entry Points: boosters
// =============================================================================

unsafe extern "C" fn booster_create(
    dmats: *const DMatrixHandle,
    len: BstUlong,
    out: *mut BoosterHandle,
) -> Status {
    guarded(|| {
        if len > 0 && dmats.is_null() {
            return Err("matrix array is null".to_string());
        }
        let mut b = FakeBooster::default();
        if len > 0 {
            b.n_features = matrix(*dmats)?.n_cols;
        }
        *out = into_handle(b);
        Ok(())
    })
}

unsafe extern "C" fn booster_free(handle: BoosterHandle) -> Status {
    guarded(|| free_handle::<FakeBooster>(handle))
}

unsafe extern "C" fn booster_set_param(
    handle: BoosterHandle,
    name: *const c_char,
    value: *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let name = string_arg(name, "parameter name")?;
        if name.is_empty() {
            return Err("parameter name is empty".to_string());
        }
        if value.is_null() {
            b.params.remove(&name);
            return Ok(());
        }
        let value = string_arg(value, "parameter value")?;
        if name == "eta" && value.parse::<f32>().is_err() {
            return Err(format!("Invalid value for parameter eta: {value}"));
        }
        b.params.insert(name, value);
        Ok(())
    })
}

unsafe extern "C" fn booster_update_one_iter(
    handle: BoosterHandle,
    _iter: c_int,
    dtrain: DMatrixHandle,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let m = matrix(dtrain)?;
        let labels = m
            .floats
            .get("label")
            .filter(|l| l.len() == m.n_rows)
            .ok_or_else(|| "label size must match the number of rows".to_string())?;
        let margin = b.margin(0);
        let residual = labels.iter().map(|y| y - margin).sum::<f32>() / labels.len() as f32;
        let step = b.eta() * residual;
        b.rounds.push(step);
        b.n_features = m.n_cols;
        Ok(())
    })
}

unsafe extern "C" fn booster_boost_one_iter(
    handle: BoosterHandle,
    dtrain: DMatrixHandle,
    grad: *mut c_float,
    hess: *mut c_float,
    len: BstUlong,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let m = matrix(dtrain)?;
        if len as usize != m.n_rows {
            return Err(format!("grad size {len} does not match {} rows", m.n_rows));
        }
        if grad.is_null() || hess.is_null() {
            return Err("gradient buffer is null".to_string());
        }
        let grad = std::slice::from_raw_parts(grad, len as usize);
        let hess = std::slice::from_raw_parts(hess, len as usize);
        let (g, h): (f32, f32) = (grad.iter().sum(), hess.iter().sum());
        let step = if h == 0.0 { 0.0 } else { -b.eta() * g / h };
        b.rounds.push(step);
        b.n_features = m.n_cols;
        Ok(())
    })
}

unsafe extern "C" fn booster_eval_one_iter(
    handle: BoosterHandle,
    iter: c_int,
    dmats: *mut DMatrixHandle,
    evnames: *mut *const c_char,
    len: BstUlong,
    out_result: *mut *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let names = string_array(evnames, len as usize)?;
        if len > 0 && dmats.is_null() {
            return Err("matrix array is null".to_string());
        }
        let margin = b.margin(0);
        let mut report = format!("[{iter}]");
        for (i, name) in names.iter().enumerate() {
            let m = matrix(*dmats.add(i))?;
            let labels = m.floats.get("label").cloned().unwrap_or_default();
            let mse = if labels.is_empty() {
                0.0
            } else {
                labels.iter().map(|y| (y - margin).powi(2)).sum::<f32>() / labels.len() as f32
            };
            report.push_str(&format!("\t{name}-rmse:{:.6}", mse.sqrt()));
        }
        b.text = CString::new(report).map_err(|e| e.to_string())?;
        *out_result = b.text.as_ptr();
        Ok(())
    })
}

unsafe extern "C" fn booster_predict(
    handle: BoosterHandle,
    dmat: DMatrixHandle,
    option_mask: c_int,
    ntree_limit: c_uint,
    _training: c_int,
    out_len: *mut BstUlong,
    out_result: *mut *const c_float,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let m = matrix(dmat)?;
        let limit = ntree_limit as usize;
        let margin = b.margin(limit);
        let n_trees = if limit == 0 {
            b.rounds.len()
        } else {
            limit.min(b.rounds.len())
        };
        let width = m.n_cols + 1;
        b.predictions = if option_mask & 2 != 0 {
            vec![0.0; m.n_rows * n_trees]
        } else if option_mask & 16 != 0 {
            let mut out = vec![0.0; m.n_rows * width * width];
            for row in out.chunks_mut(width * width) {
                row[width * width - 1] = margin;
            }
            out
        } else if option_mask & 4 != 0 {
            let mut out = vec![0.0; m.n_rows * width];
            for row in out.chunks_mut(width) {
                row[width - 1] = margin;
            }
            out
        } else {
            vec![margin; m.n_rows]
        };
        *out_len = b.predictions.len() as BstUlong;
        *out_result = b.predictions.as_ptr();
        Ok(())
    })
}

unsafe extern "C" fn booster_load_model(handle: BoosterHandle, fname: *const c_char) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let path = string_arg(fname, "file name")?;
        let bytes = std::fs::read(&path).map_err(|e| format!("failed to read {path}: {e}"))?;
        b.decode(&bytes)
    })
}

unsafe extern "C" fn booster_save_model(handle: BoosterHandle, fname: *const c_char) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let path = string_arg(fname, "file name")?;
        std::fs::write(&path, b.encode()?).map_err(|e| format!("failed to write {path}: {e}"))
    })
}

unsafe extern "C" fn booster_load_model_from_buffer(
    handle: BoosterHandle,
    buf: *const c_void,
    len: BstUlong,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        if buf.is_null() {
            return Err("buffer is null".to_string());
        }
        let bytes = std::slice::from_raw_parts(buf as *const u8, len as usize);
        b.decode(bytes)
    })
}

unsafe extern "C" fn booster_get_model_raw(
    handle: BoosterHandle,
    out_len: *mut BstUlong,
    out_dptr: *mut *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        b.raw = b.encode()?;
        *out_len = b.raw.len() as BstUlong;
        *out_dptr = b.raw.as_ptr() as *const c_char;
        Ok(())
    })
}

unsafe fn check_fmap(fmap: *const c_char) -> Result<(), String> {
    let fmap = string_arg(fmap, "feature map")?;
    if !fmap.is_empty() && !std::path::Path::new(&fmap).exists() {
        return Err(format!("feature map {fmap} does not exist"));
    }
    Ok(())
}

unsafe fn feature_names(
    b: &FakeBooster,
    fnum: c_int,
    fname: *const *const c_char,
    ftype: *const *const c_char,
) -> Result<Vec<String>, String> {
    let fnum = usize::try_from(fnum).map_err(|_| "negative feature count".to_string())?;
    if b.n_features > 0 && fnum != b.n_features {
        return Err(format!(
            "feature count {fnum} does not match the model's {} features",
            b.n_features
        ));
    }
    let names = string_array(fname, fnum)?;
    for t in string_array(ftype, fnum)? {
        if !matches!(t.as_str(), "q" | "i" | "int" | "float") {
            return Err(format!("unknown feature type: {t}"));
        }
    }
    Ok(names)
}

unsafe fn write_dump(
    b: &mut FakeBooster,
    out_len: *mut BstUlong,
    out_models: *mut *const *const c_char,
) {
    *out_len = b.string_ptrs.len() as BstUlong;
    *out_models = b.string_ptrs.as_ptr();
}

unsafe extern "C" fn booster_dump_model(
    handle: BoosterHandle,
    fmap: *const c_char,
    with_stats: c_int,
    out_len: *mut BstUlong,
    out_dump_array: *mut *const *const c_char,
) -> Status {
    booster_dump_model_ex(handle, fmap, with_stats, c"text".as_ptr(), out_len, out_dump_array)
}

unsafe extern "C" fn booster_dump_model_ex(
    handle: BoosterHandle,
    fmap: *const c_char,
    with_stats: c_int,
    format: *const c_char,
    out_len: *mut BstUlong,
    out_dump_array: *mut *const *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        check_fmap(fmap)?;
        let format = string_arg(format, "format")?;
        b.dump(with_stats != 0, &format, None)?;
        write_dump(b, out_len, out_dump_array);
        Ok(())
    })
}

unsafe extern "C" fn booster_dump_model_with_features(
    handle: BoosterHandle,
    fnum: c_int,
    fname: *const *const c_char,
    ftype: *const *const c_char,
    with_stats: c_int,
    out_len: *mut BstUlong,
    out_models: *mut *const *const c_char,
) -> Status {
    booster_dump_model_ex_with_features(
        handle,
        fnum,
        fname,
        ftype,
        with_stats,
        c"text".as_ptr(),
        out_len,
        out_models,
    )
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn booster_dump_model_ex_with_features(
    handle: BoosterHandle,
    fnum: c_int,
    fname: *const *const c_char,
    ftype: *const *const c_char,
    with_stats: c_int,
    format: *const c_char,
    out_len: *mut BstUlong,
    out_models: *mut *const *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let names = feature_names(b, fnum, fname, ftype)?;
        let format = string_arg(format, "format")?;
        b.dump(with_stats != 0, &format, Some(&names))?;
        write_dump(b, out_len, out_models);
        Ok(())
    })
}

unsafe extern "C" fn booster_get_attr(
    handle: BoosterHandle,
    key: *const c_char,
    out: *mut *const c_char,
    success: *mut c_int,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let key = string_arg(key, "attribute key")?;
        match b.attrs.get(&key) {
            Some(value) => {
                b.text = CString::new(value.as_str()).map_err(|e| e.to_string())?;
                *out = b.text.as_ptr();
                *success = 1;
            }
            None => {
                *out = std::ptr::null();
                *success = 0;
            }
        }
        Ok(())
    })
}

unsafe extern "C" fn booster_set_attr(
    handle: BoosterHandle,
    key: *const c_char,
    value: *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let key = string_arg(key, "attribute key")?;
        if value.is_null() {
            b.attrs.remove(&key);
        } else {
            b.attrs.insert(key, string_arg(value, "attribute value")?);
        }
        Ok(())
    })
}

unsafe extern "C" fn booster_get_attr_names(
    handle: BoosterHandle,
    out_len: *mut BstUlong,
    out: *mut *const *const c_char,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        let names = b.attrs.keys().cloned().collect();
        b.set_strings(names)?;
        write_dump(b, out_len, out);
        Ok(())
    })
}

unsafe extern "C" fn booster_load_rabit_checkpoint(
    handle: BoosterHandle,
    version: *mut c_int,
) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        if version.is_null() {
            return Err("version is null".to_string());
        }
        if let Some(snapshot) = b.checkpoint.clone() {
            b.decode(&snapshot)?;
        }
        *version = b.version;
        Ok(())
    })
}

unsafe extern "C" fn booster_save_rabit_checkpoint(handle: BoosterHandle) -> Status {
    guarded(|| {
        let b = booster(handle)?;
        b.checkpoint = Some(b.encode()?);
        b.version += 1;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_fill_the_error_slot() {
        let status = guarded(|| Err("boom".to_string()));
        assert_eq!(status, -1);
        let msg = unsafe { CStr::from_ptr(get_last_error()) };
        assert_eq!(msg.to_str().unwrap(), "boom");
    }

    #[test]
    fn model_encoding_round_trips() {
        let mut b = FakeBooster {
            rounds: vec![0.5, -0.25],
            n_features: 3,
            ..Default::default()
        };
        b.attrs.insert("k".to_string(), String::new());
        let bytes = b.encode().unwrap();

        let mut restored = FakeBooster::default();
        restored.decode(&bytes).unwrap();
        assert_eq!(restored.rounds, b.rounds);
        assert_eq!(restored.n_features, 3);
        assert_eq!(restored.attrs.get("k").map(String::as_str), Some(""));
        assert!(restored.decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn model_decoding_rejects_foreign_bytes() {
        let bytes = FakeBooster::default().encode().unwrap();
        let mut restored = FakeBooster::default();

        let mut trailing = bytes.clone();
        trailing.push(0);
        let err = restored.decode(&trailing).unwrap_err();
        assert!(err.contains("trailing bytes"), "{err}");

        let err = restored.decode(&bytes[MODEL_MAGIC.len()..]).unwrap_err();
        assert!(err.contains("bad magic"), "{err}");

        let mut wrong_kind = MATRIX_MAGIC.to_vec();
        wrong_kind.extend_from_slice(&bytes[MODEL_MAGIC.len()..]);
        assert!(restored.decode(&wrong_kind).is_err());
    }

    #[test]
    fn matrix_file_keeps_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.buffer");
        let mut floats = HashMap::new();
        floats.insert("label".to_string(), vec![1.0, f32::NAN]);
        let mut uints = HashMap::new();
        uints.insert("group_ptr".to_string(), vec![0, 2]);
        let m = FakeMatrix {
            n_rows: 2,
            n_cols: 1,
            data: vec![0.5, -1.5],
            floats,
            uints,
        };
        std::fs::write(&path, encode_with_magic(MATRIX_MAGIC, &m).unwrap()).unwrap();

        let restored = read_matrix_file(path.to_str().unwrap()).unwrap();
        assert_eq!((restored.n_rows, restored.n_cols), (2, 1));
        assert_eq!(restored.data, vec![0.5, -1.5]);
        assert!(restored.floats["label"][1].is_nan());
        assert_eq!(restored.uints["group_ptr"], vec![0, 2]);

        std::fs::write(&path, b"label 1 2 3").unwrap();
        assert!(read_matrix_file(path.to_str().unwrap()).is_err());
    }
}
