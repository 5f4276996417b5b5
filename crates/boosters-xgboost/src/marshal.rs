//! Moving arrays and strings across the C boundary.
//!
//! Inputs are borrowed for the duration of one call: Rust slices never move
//! while borrowed, and every transient C string is owned by a value that is
//! dropped on all exit paths. Outputs are always copied out of engine memory
//! before the engine lock is released, using exactly the length the engine
//! reports and the element type of the C declaration.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;

use crate::error::{Result, XgbError};
use crate::ffi::BstUlong;

// =============================================================================
// Validation
// =============================================================================

/// Fail with `EmptyInput` when `len` is zero.
pub(crate) fn ensure_non_empty(operation: &'static str, len: usize) -> Result<()> {
    if len == 0 {
        return Err(XgbError::EmptyInput { operation });
    }
    Ok(())
}

/// Fail with `LengthMismatch` when two parallel inputs disagree.
pub(crate) fn ensure_same_len(field: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(XgbError::LengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Convert a host length to `bst_ulong`.
pub(crate) fn ffi_len(what: &'static str, len: usize) -> Result<BstUlong> {
    BstUlong::try_from(len).map_err(|_| XgbError::TooLarge { what, len })
}

/// Convert an engine-reported `bst_ulong` to a host length.
pub(crate) fn host_len(what: &'static str, len: BstUlong) -> Result<usize> {
    usize::try_from(len).map_err(|_| XgbError::TooLarge {
        what,
        len: usize::MAX,
    })
}

/// Convert a host length to a C `int` (feature counts, iteration numbers).
pub(crate) fn ffi_int(what: &'static str, len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| XgbError::TooLarge { what, len })
}

// =============================================================================
// Dense Input
// =============================================================================

/// Flatten equal-length rows into one row-major buffer.
///
/// Returns `(data, n_rows, n_cols)`.
pub(crate) fn flatten_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<(Vec<f32>, usize, usize)> {
    let operation = "dense matrix construction";
    let n_rows = rows.len();
    ensure_non_empty(operation, n_rows)?;
    let n_cols = rows[0].as_ref().len();
    ensure_non_empty(operation, n_cols)?;

    let mut data = Vec::with_capacity(n_rows * n_cols);
    for (row_index, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        if row.len() != n_cols {
            return Err(XgbError::Shape {
                expected_cols: n_cols,
                actual_cols: row.len(),
                row_index,
            });
        }
        data.extend_from_slice(row);
    }
    Ok((data, n_rows, n_cols))
}

// =============================================================================
// Strings
// =============================================================================

/// Copy `value` into a NUL-terminated string.
pub(crate) fn c_string(what: &'static str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| XgbError::InteriorNul { what })
}

/// Copy a filesystem path into a NUL-terminated string.
pub(crate) fn c_path(what: &'static str, path: &Path) -> Result<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path.to_string_lossy().into_owned().into_bytes();
    CString::new(bytes).map_err(|_| XgbError::InteriorNul { what })
}

/// An owned array of C strings plus the pointer array the engine reads.
///
/// The pointers stay valid for as long as this value lives; dropping it
/// releases every string.
pub(crate) struct CStrArray {
    _owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStrArray {
    pub(crate) fn new<S: AsRef<str>>(what: &'static str, values: &[S]) -> Result<Self> {
        let owned = values
            .iter()
            .map(|v| c_string(what, v.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let ptrs = owned.iter().map(|s| s.as_ptr()).collect();
        Ok(Self {
            _owned: owned,
            ptrs,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub(crate) fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    /// Some entry points declare the array non-const without writing to it.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut *const c_char {
        self.ptrs.as_mut_ptr()
    }
}

// =============================================================================
// Output Copies
// =============================================================================

/// Copy `len` elements of `T` starting at `ptr`.
///
/// # Safety
///
/// When `len > 0` and `ptr` is non-null, `ptr` must point to `len`
/// initialized values of `T`.
pub(crate) unsafe fn copy_slice<T: Copy>(
    operation: &'static str,
    ptr: *const T,
    len: BstUlong,
) -> Result<Vec<T>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(XgbError::NullOutput { operation });
    }
    let len = host_len(operation, len)?;
    Ok(std::slice::from_raw_parts(ptr, len).to_vec())
}

/// Copy one NUL-terminated string.
///
/// # Safety
///
/// A non-null `ptr` must point to a NUL-terminated string.
pub(crate) unsafe fn copy_string(operation: &'static str, ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(XgbError::NullOutput { operation });
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Copy `len` NUL-terminated strings from a pointer array.
///
/// # Safety
///
/// When `len > 0`, `ptr` must point to `len` pointers that are each null or
/// NUL-terminated strings.
pub(crate) unsafe fn copy_strings(
    operation: &'static str,
    ptr: *const *const c_char,
    len: BstUlong,
) -> Result<Vec<String>> {
    copy_slice(operation, ptr, len)?
        .into_iter()
        .map(|s| copy_string(operation, s))
        .collect()
}
