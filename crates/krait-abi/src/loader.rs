//! Resolution of the function table from an installed runtime.
//!
//! The provisioning/locator subsystem (out of scope here) hands us a
//! resolved installation: the shared-library path, the runtime version and
//! the home directory. This module opens the library once and binds every
//! [`NativeApi`] entry to its exported symbol. Nothing is re-resolved after
//! that; the table and the library live for the rest of the process.

use std::path::PathBuf;

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::api::NativeApi;
use crate::object::RawObject;

/// A resolved native-runtime installation, produced by the locator
/// subsystem and consumed exactly once at process start.
#[derive(Debug, Clone)]
pub struct InstallDescriptor {
    /// Path to the runtime shared library (`libpython3.x.so`, `.dylib`,
    /// `python3x.dll`).
    pub library_path: PathBuf,
    /// Version string, e.g. `"3.12"`. Informational.
    pub version: String,
    /// Runtime home directory, if the installation needs one.
    pub home: Option<PathBuf>,
}

/// Result type for table resolution.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors raised while resolving the function table.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The shared library could not be opened.
    #[error("failed to load runtime library {path}: {source}")]
    Library {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying loader error.
        source: libloading::Error,
    },

    /// An expected exported symbol was missing.
    #[error("runtime library does not export symbol `{name}`: {source}")]
    Symbol {
        /// The symbol name.
        name: &'static str,
        /// Underlying loader error.
        source: libloading::Error,
    },

    /// A data symbol resolved to a null address.
    #[error("runtime symbol `{name}` resolved to a null address")]
    NullSymbol {
        /// The symbol name.
        name: &'static str,
    },
}

/// A resolved table together with the library that keeps it valid.
#[derive(Debug)]
pub struct LoadedApi {
    api: NativeApi,
    _library: Library,
}

impl LoadedApi {
    /// Access the resolved table.
    pub fn api(&self) -> &NativeApi {
        &self.api
    }

    /// Leak the table for the lifetime of the process.
    ///
    /// The embedded runtime is never unloaded once initialized (finalizing
    /// and re-initializing the interpreter is unsupported), so the library
    /// handle is intentionally leaked along with the table.
    pub fn leak(self) -> &'static NativeApi {
        std::mem::forget(self._library);
        Box::leak(Box::new(self.api))
    }
}

/// Resolve a function pointer entry.
///
/// # Safety
///
/// `T` must be the exact `unsafe extern "C"` signature of the exported
/// symbol.
unsafe fn func<T: Copy>(lib: &Library, name: &'static str) -> LoadResult<T> {
    let symbol = lib
        .get::<T>(name.as_bytes())
        .map_err(|source| LoadError::Symbol { name, source })?;
    Ok(*symbol)
}

/// Resolve the address of an exported data object (a static struct such as
/// `PyDict_Type` or `_Py_NoneStruct`).
unsafe fn data_addr(lib: &Library, name: &'static str) -> LoadResult<*mut RawObject> {
    let symbol = lib
        .get::<*mut RawObject>(name.as_bytes())
        .map_err(|source| LoadError::Symbol { name, source })?;
    match symbol.try_as_raw_ptr() {
        Some(addr) if !addr.is_null() => Ok(addr.cast::<RawObject>()),
        _ => Err(LoadError::NullSymbol { name }),
    }
}

/// Resolve the value of an exported pointer variable (such as
/// `PyExc_StopIteration`, declared as `PyObject *`).
unsafe fn data_value(lib: &Library, name: &'static str) -> LoadResult<*mut RawObject> {
    let symbol = lib
        .get::<*mut *mut RawObject>(name.as_bytes())
        .map_err(|source| LoadError::Symbol { name, source })?;
    let value = **symbol;
    if value.is_null() {
        return Err(LoadError::NullSymbol { name });
    }
    Ok(value)
}

/// Open the runtime library named by `descriptor` and bind the full table.
///
/// This performs symbol resolution only; it does not initialize the
/// interpreter. Initialization (and the one-time lock handoff) is the
/// responsibility of the interop core.
pub fn load_native_api(descriptor: &InstallDescriptor) -> LoadResult<LoadedApi> {
    debug!(
        path = %descriptor.library_path.display(),
        version = %descriptor.version,
        "loading native runtime library"
    );

    let library = unsafe { Library::new(&descriptor.library_path) }.map_err(|source| {
        LoadError::Library {
            path: descriptor.library_path.clone(),
            source,
        }
    })?;

    let api = unsafe {
        NativeApi {
            initialize: func(&library, "Py_InitializeEx")?,
            is_initialized: func(&library, "Py_IsInitialized")?,
            finalize: func(&library, "Py_FinalizeEx")?,
            eval_save_thread: func(&library, "PyEval_SaveThread")?,

            gil_ensure: func(&library, "PyGILState_Ensure")?,
            gil_release: func(&library, "PyGILState_Release")?,

            incref: func(&library, "Py_IncRef")?,
            decref: func(&library, "Py_DecRef")?,

            getattr: func(&library, "PyObject_GetAttrString")?,
            hasattr: func(&library, "PyObject_HasAttrString")?,
            call_no_args: func(&library, "PyObject_CallNoArgs")?,
            call: func(&library, "PyObject_Call")?,
            object_str: func(&library, "PyObject_Str")?,
            object_repr: func(&library, "PyObject_Repr")?,
            object_type: func(&library, "PyObject_Type")?,
            is_true: func(&library, "PyObject_IsTrue")?,
            rich_compare_bool: func(&library, "PyObject_RichCompareBool")?,
            get_iter: func(&library, "PyObject_GetIter")?,
            is_instance: func(&library, "PyObject_IsInstance")?,

            long_from_i64: func(&library, "PyLong_FromLongLong")?,
            long_as_i64: func(&library, "PyLong_AsLongLong")?,
            float_from_f64: func(&library, "PyFloat_FromDouble")?,
            float_as_f64: func(&library, "PyFloat_AsDouble")?,
            str_from_utf8: func(&library, "PyUnicode_FromStringAndSize")?,
            str_as_utf8: func(&library, "PyUnicode_AsUTF8AndSize")?,
            bytes_from: func(&library, "PyBytes_FromStringAndSize")?,
            bytes_as_ptr: func(&library, "PyBytes_AsStringAndSize")?,

            list_new: func(&library, "PyList_New")?,
            list_size: func(&library, "PyList_Size")?,
            list_get_item: func(&library, "PyList_GetItem")?,
            list_set_item: func(&library, "PyList_SetItem")?,
            tuple_new: func(&library, "PyTuple_New")?,
            tuple_size: func(&library, "PyTuple_Size")?,
            tuple_get_item: func(&library, "PyTuple_GetItem")?,
            tuple_set_item: func(&library, "PyTuple_SetItem")?,
            dict_new: func(&library, "PyDict_New")?,
            dict_set_item: func(&library, "PyDict_SetItem")?,
            mapping_items: func(&library, "PyMapping_Items")?,
            mapping_check: func(&library, "PyMapping_Check")?,
            sequence_check: func(&library, "PySequence_Check")?,
            sequence_size: func(&library, "PySequence_Size")?,
            sequence_get_item: func(&library, "PySequence_GetItem")?,

            iter_next: func(&library, "PyIter_Next")?,

            err_occurred: func(&library, "PyErr_Occurred")?,
            err_fetch: func(&library, "PyErr_Fetch")?,
            err_clear: func(&library, "PyErr_Clear")?,
            err_given_exception_matches: func(&library, "PyErr_GivenExceptionMatches")?,

            import_module: func(&library, "PyImport_ImportModule")?,
            run_string: func(&library, "PyRun_String")?,

            check_buffer: func(&library, "PyObject_CheckBuffer")?,
            get_buffer: func(&library, "PyObject_GetBuffer")?,
            release_buffer: func(&library, "PyBuffer_Release")?,

            none: data_addr(&library, "_Py_NoneStruct")?,
            true_obj: data_addr(&library, "_Py_TrueStruct")?,
            false_obj: data_addr(&library, "_Py_FalseStruct")?,
            dict_type: data_addr(&library, "PyDict_Type")?,
            list_type: data_addr(&library, "PyList_Type")?,
            tuple_type: data_addr(&library, "PyTuple_Type")?,
            str_type: data_addr(&library, "PyUnicode_Type")?,
            long_type: data_addr(&library, "PyLong_Type")?,
            float_type: data_addr(&library, "PyFloat_Type")?,
            bool_type: data_addr(&library, "PyBool_Type")?,
            bytes_type: data_addr(&library, "PyBytes_Type")?,
            gen_type: data_addr(&library, "PyGen_Type")?,
            coro_type: data_addr(&library, "PyCoro_Type")?,
            exc_stop_iteration: data_value(&library, "PyExc_StopIteration")?,
            exc_stop_async_iteration: data_value(&library, "PyExc_StopAsyncIteration")?,
        }
    };

    debug!("native runtime table resolved");
    Ok(LoadedApi {
        api,
        _library: library,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_reports_path() {
        let descriptor = InstallDescriptor {
            library_path: PathBuf::from("/definitely/not/here/libpython3.12.so"),
            version: "3.12".to_string(),
            home: None,
        };
        let err = load_native_api(&descriptor).expect_err("library should not exist");
        match err {
            LoadError::Library { path, .. } => {
                assert_eq!(path, descriptor.library_path);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
