//! Loading the native engine and serializing calls into it.
//!
//! [`Engine`] owns the loaded shared library together with the lock that
//! makes "foreign call + last-error read" one uninterrupted unit. Handles keep
//! a clone of their engine, so the library stays loaded while any handle lives.
//!
//! # Example
//!
//! ```no_run
//! use boosters_xgboost::{Engine, EngineConfig};
//!
//! let config = EngineConfig::builder()
//!     .search_dirs(vec!["/opt/xgboost/lib".into()])
//!     .build();
//! let engine = Engine::load(&config)?;
//! # Ok::<(), boosters_xgboost::XgbError>(())
//! ```

use std::ffi::{CStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bon::Builder;
use libloading::Library;

use crate::error::{Result, XgbError};
use crate::ffi::{Api, Status};

/// Environment variable naming the shared library to load.
pub const LIBRARY_PATH_ENV: &str = "XGBOOST_LIBRARY_PATH";

static GLOBAL: OnceLock<Engine> = OnceLock::new();

// =============================================================================
// EngineConfig
// =============================================================================

/// Where to look for the engine's shared library.
///
/// An explicit `library_path` is used as-is. Otherwise the
/// [`LIBRARY_PATH_ENV`] variable is honored, and failing that each of
/// `search_dirs` is tried before handing the bare platform file name to the
/// system loader.
#[derive(Debug, Clone, Default, Builder)]
pub struct EngineConfig {
    /// Exact path of the shared library.
    #[builder(into)]
    pub library_path: Option<PathBuf>,

    /// Directories searched for the platform library file name.
    #[builder(default)]
    pub search_dirs: Vec<PathBuf>,
}

impl EngineConfig {
    /// Library paths to try, in order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.library_path {
            return vec![path.clone()];
        }
        if let Some(path) = std::env::var_os(LIBRARY_PATH_ENV).filter(|p| !p.is_empty()) {
            return vec![PathBuf::from(path)];
        }
        let file_name: OsString = libloading::library_filename("xgboost");
        let mut out: Vec<PathBuf> = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .collect();
        out.push(PathBuf::from(file_name));
        out
    }
}

// =============================================================================
// Engine
// =============================================================================

struct EngineInner {
    api: Api,
    lock: Mutex<()>,
    origin: PathBuf,
    // Keeps the function pointers in `api` valid. `None` for in-process engines.
    _library: Option<Library>,
}

/// A loaded engine.
///
/// Cloning is cheap and yields a reference to the same library and lock.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Load the engine according to `config`.
    ///
    /// Returns the error of the last candidate tried when none loads.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let mut last_err = None;
        for path in config.candidates() {
            match Self::load_path(path.clone()) {
                Ok(engine) => return Ok(engine),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "xgboost candidate rejected");
                    last_err = Some(err);
                }
            }
        }
        // `candidates` always yields at least the bare file name.
        Err(last_err.unwrap_or_else(|| XgbError::Unsupported {
            name: "engine loading without candidates",
        }))
    }

    /// Load the engine with the default search order.
    pub fn load_default() -> Result<Self> {
        Self::load(&EngineConfig::default())
    }

    /// Process-wide engine loaded with the default search order.
    ///
    /// A failed load is not cached; the next call tries again.
    pub fn global() -> Result<Self> {
        if let Some(engine) = GLOBAL.get() {
            return Ok(engine.clone());
        }
        let engine = Self::load_default()?;
        Ok(GLOBAL.get_or_init(|| engine).clone())
    }

    fn load_path(path: PathBuf) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; XGBoost has no
        // initializer preconditions.
        let library = unsafe { Library::new(&path) }.map_err(|source| XgbError::EngineLoad {
            path: path.clone(),
            source,
        })?;
        // SAFETY: the symbols are resolved against the 1.x C API signatures and
        // `library` is stored next to the table below.
        let api = unsafe { Api::load(&library) }.map_err(|source| XgbError::EngineLoad {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded xgboost");
        Ok(Self {
            inner: Arc::new(EngineInner {
                api,
                lock: Mutex::new(()),
                origin: path,
                _library: Some(library),
            }),
        })
    }

    /// Build an engine over an in-process function table.
    pub(crate) fn from_api(api: Api, origin: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                api,
                lock: Mutex::new(()),
                origin: origin.into(),
                _library: None,
            }),
        }
    }

    /// Path the engine was loaded from.
    pub fn origin(&self) -> &std::path::Path {
        &self.inner.origin
    }

    /// Returns true if both values refer to the same loaded engine.
    pub fn same_as(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Forwarding engine log output is not supported.
    pub fn register_log_callback<F>(&self, _callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Err(XgbError::Unsupported {
            name: "log callback registration",
        })
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Everything inside `f` (the foreign call, the error read in
    /// [`Call::check`] and any copy out of engine-owned memory) happens before
    /// another caller can reach the engine.
    pub(crate) fn invoke<T>(&self, f: impl FnOnce(&Call<'_>) -> Result<T>) -> Result<T> {
        let guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let call = Call {
            api: &self.inner.api,
            _guard: guard,
        };
        f(&call)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("origin", &self.inner.origin)
            .finish()
    }
}

// =============================================================================
// Call
// =============================================================================

/// Exclusive access to the function table for the duration of one operation.
pub(crate) struct Call<'e> {
    api: &'e Api,
    _guard: MutexGuard<'e, ()>,
}

impl Call<'_> {
    pub(crate) fn api(&self) -> &Api {
        self.api
    }

    /// Convert a status code into a result, reading the last-error slot on failure.
    pub(crate) fn check(&self, status: Status) -> Result<()> {
        if status == 0 {
            return Ok(());
        }
        // SAFETY: no preconditions; the returned string lives until the next
        // failing call, which cannot happen while the lock is held.
        let ptr = unsafe { (self.api.get_last_error)() };
        let message = if ptr.is_null() {
            String::new()
        } else {
            // SAFETY: the engine returns a NUL-terminated string.
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
        };
        tracing::debug!(status, message = %message, "xgboost call failed");
        Err(XgbError::native(status, message))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{c_char, c_int};

    use super::*;
    use crate::error::UNKNOWN_ERROR;
    use crate::testing::fake;

    unsafe extern "C" fn empty_last_error() -> *const c_char {
        c"".as_ptr()
    }

    unsafe extern "C" fn failing_num_row(_: crate::ffi::DMatrixHandle, _: *mut u64) -> c_int {
        -1
    }

    #[test]
    fn explicit_path_is_the_only_candidate() {
        let config = EngineConfig::builder()
            .library_path("/opt/xgb/libxgboost.so")
            .search_dirs(vec![PathBuf::from("/usr/lib")])
            .build();
        assert_eq!(config.candidates(), vec![PathBuf::from("/opt/xgb/libxgboost.so")]);
    }

    #[test]
    fn search_dirs_precede_bare_file_name() {
        if std::env::var_os(LIBRARY_PATH_ENV).is_some() {
            return;
        }
        let config = EngineConfig::builder()
            .search_dirs(vec![PathBuf::from("/a"), PathBuf::from("/b")])
            .build();
        let file = PathBuf::from(libloading::library_filename("xgboost"));
        assert_eq!(
            config.candidates(),
            vec![PathBuf::from("/a").join(&file), PathBuf::from("/b").join(&file), file]
        );
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let config = EngineConfig::builder()
            .library_path("/nonexistent/libxgboost-missing.so")
            .build();
        let err = Engine::load(&config).unwrap_err();
        assert!(matches!(err, XgbError::EngineLoad { .. }));
    }

    #[test]
    fn failure_without_message_reports_unknown_error() {
        let api = Api {
            get_last_error: empty_last_error,
            dmatrix_num_row: failing_num_row,
            ..fake::api()
        };
        let engine = Engine::from_api(api, "silent");
        let err = engine
            .invoke(|call| {
                let mut n = 0u64;
                let status = unsafe { (call.api().dmatrix_num_row)(std::ptr::null_mut(), &mut n) };
                call.check(status)
            })
            .unwrap_err();
        match err {
            XgbError::Native { code, message } => {
                assert_eq!(code, -1);
                assert_eq!(message, UNKNOWN_ERROR);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn log_callback_is_unsupported() {
        let engine = fake::engine();
        let err = engine.register_log_callback(|_| {}).unwrap_err();
        assert!(matches!(err, XgbError::Unsupported { .. }));
    }

    #[test]
    fn clones_share_the_engine() {
        let a = fake::engine();
        let b = a.clone();
        let c = fake::engine();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
