// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Executable-memory loader for jitted machine code
//!
//! This crate takes a buffer of already-assembled machine code, places it in
//! its own OS memory region, and lets the caller invoke it through one fixed
//! native signature until the region is released.
//!
//! # Overview
//!
//! The loader handles:
//! - Allocating a fresh read+write region sized exactly to the code
//! - Copying the code in, then sealing the region read+execute (W^X)
//! - Calling the entry point as `int f(const char *data, size_t length)`
//! - Releasing the region exactly once
//!
//! # Architecture
//!
//! ```text
//! FunctionTable / C ABI (shared handles, ids, result codes)
//!      ↓
//! Function (owned handle: load → call* → unload)
//!      ↓
//! Region (allocate → install → seal → release)
//!      ↓
//! Backend (Mmap on Unix, VirtualMemory on Windows)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use loadcode::Function;
//!
//! // x86-64: mov eax, 7; ret
//! let function = Function::load(b"\xb8\x07\x00\x00\x00\xc3")?;
//! let result = unsafe { function.call(b"elo") };
//! assert_eq!(result, 7);
//! function.unload()?;
//! # Ok::<(), loadcode::LoadError>(())
//! ```
//!
//! # Thread Safety
//!
//! Distinct functions are fully independent. A single [`Function`] is
//! `Send + Sync` once loaded since its region is read-only; it is released by
//! value, so no call can race its release. [`FunctionTable`] defers the
//! release of a shared function until its last in-flight call finishes.

mod error;
mod ffi;
mod function;
mod region;
mod table;

pub use error::{error_class, ErrorClass, ErrorCode, LoadError, LoadResult, UnloadError};
pub use ffi::{
    loadcode_call, loadcode_error_base, loadcode_error_class, loadcode_load, loadcode_strerror,
    loadcode_unload, LoadedCode,
};
pub use function::{EntryFn, Function};
#[cfg(unix)]
pub use region::Mmap;
#[cfg(windows)]
pub use region::VirtualMemory;
pub use region::{Backend, NativeBackend, State};
pub use table::{FunctionId, FunctionTable};
