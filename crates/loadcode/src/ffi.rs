// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Exposition of the loader via a C ABI.
//!
//! A host binding calls `loadcode_load` to get an opaque handle, calls it any
//! number of times with `loadcode_call`, and hands it back exactly once to
//! `loadcode_unload` (typically from its garbage collector). Failures are
//! reported as the negative values of [`ErrorCode`]; the binding turns them
//! into instances of the class described by `loadcode_error_class`.

use std::{
    ffi::{c_char, c_int},
    ptr, slice,
};

use crate::{
    error::{error_class, ErrorCode},
    function::Function,
};

/// Opaque handle type seen by C callers
pub type LoadedCode = Function;

/// Loads `len` bytes of machine code from `code`.
///
/// On success, stores an owned handle into `*out` and returns 0. On failure,
/// leaves `*out` untouched and returns a negative `ErrorCode`.
///
/// #   Safety
///
/// -   `code` must be valid for reads of `len` bytes.
/// -   `out` must be valid for a pointer-sized write.
#[no_mangle]
pub unsafe extern "C" fn loadcode_load(
    code: *const u8,
    len: usize,
    out: *mut *mut LoadedCode,
) -> c_int {
    if out.is_null() {
        return ErrorCode::InvalidHandle as c_int;
    }
    if len == 0 {
        return ErrorCode::SizeMismatch as c_int;
    }
    if code.is_null() {
        return ErrorCode::InvalidHandle as c_int;
    }

    let code = slice::from_raw_parts(code, len);
    match Function::load(code) {
        Ok(function) => {
            *out = Box::into_raw(Box::new(function));
            ErrorCode::Ok as c_int
        }
        Err(e) => {
            tracing::debug!(error = %e, "loadcode_load failed");
            e.code() as c_int
        }
    }
}

/// Calls the code behind `handle` with `data` and `len`, returning its result.
///
/// No check is made on `handle`: this is the hot path.
///
/// #   Safety
///
/// -   `handle` must come from `loadcode_load` and not have been unloaded.
/// -   The loaded code must honor `int f(const char*, size_t)`, and only read
///     what `data` and `len` allow.
#[no_mangle]
pub unsafe extern "C" fn loadcode_call(
    handle: *const LoadedCode,
    data: *const u8,
    len: usize,
) -> c_int {
    debug_assert!(!handle.is_null(), "loadcode_call on a null handle");
    (*handle).call_raw(data, len)
}

/// Releases the code behind `handle`.
///
/// Returns 0 once the handle is freed. On a negative result the handle is
/// still valid: its region is mapped and its storage is not freed, so the
/// caller may retry or leak it.
///
/// #   Safety
///
/// -   `handle` must be null or come from `loadcode_load` and not have been
///     unloaded successfully yet.
/// -   No `loadcode_call` on `handle` may be in flight.
#[no_mangle]
pub unsafe extern "C" fn loadcode_unload(handle: *mut LoadedCode) -> c_int {
    if handle.is_null() {
        return ErrorCode::InvalidHandle as c_int;
    }

    match (*handle).release() {
        Ok(()) => {
            drop(Box::from_raw(handle));
            ErrorCode::Ok as c_int
        }
        Err(e) => {
            tracing::warn!(error = %e, "loadcode_unload failed, handle kept");
            e.code() as c_int
        }
    }
}

/// Name of the exception class loader failures map to.
#[no_mangle]
pub extern "C" fn loadcode_error_class() -> *const c_char {
    error_class().name.as_ptr()
}

/// Name of the base class the loader's exception class derives from.
#[no_mangle]
pub extern "C" fn loadcode_error_base() -> *const c_char {
    error_class().base.as_ptr()
}

/// Static message for a result code, or NULL if `code` is unknown.
#[no_mangle]
pub extern "C" fn loadcode_strerror(code: c_int) -> *const c_char {
    ErrorCode::from_raw(code).map_or(ptr::null(), |code| code.c_message().as_ptr())
}
