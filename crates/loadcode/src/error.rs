// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the loadcode crate

use std::{ffi::CStr, sync::OnceLock};

use thiserror::Error;

use crate::function::Function;
use crate::region::Backend;

/// Loader errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to allocate {size} bytes of code memory: {reason}")]
    AllocationFailure { size: usize, reason: String },

    #[error("failed to make code memory executable: {reason}")]
    ProtectionFailure { reason: String },

    #[error("failed to release code memory: {reason}")]
    ReleaseFailure { reason: String },

    #[error("code size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("invalid handle: {reason}")]
    InvalidHandle { reason: String },
}

/// Result type alias for loader operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Reason string for a failed OS call, read from `errno` / `GetLastError`
pub(crate) fn os_failure(call: &str) -> String {
    format!("{call} failed: {}", std::io::Error::last_os_error())
}

impl LoadError {
    /// Stable integer code reported across the C ABI
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AllocationFailure { .. } => ErrorCode::AllocationFailure,
            Self::ProtectionFailure { .. } => ErrorCode::ProtectionFailure,
            Self::ReleaseFailure { .. } => ErrorCode::ReleaseFailure,
            Self::SizeMismatch { .. } => ErrorCode::SizeMismatch,
            Self::InvalidHandle { .. } => ErrorCode::InvalidHandle,
        }
    }

    pub(crate) fn invalid_handle(reason: impl Into<String>) -> Self {
        Self::InvalidHandle {
            reason: reason.into(),
        }
    }
}

/// Result codes handed to a binding layer
///
/// `Ok` is zero, every failure is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    AllocationFailure = -1,
    ProtectionFailure = -2,
    ReleaseFailure = -3,
    SizeMismatch = -4,
    InvalidHandle = -5,
}

impl ErrorCode {
    /// All codes, in declaration order
    pub const ALL: [ErrorCode; 6] = [
        ErrorCode::Ok,
        ErrorCode::AllocationFailure,
        ErrorCode::ProtectionFailure,
        ErrorCode::ReleaseFailure,
        ErrorCode::SizeMismatch,
        ErrorCode::InvalidHandle,
    ];

    /// Look up a code from its raw value
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|code| *code as i32 == raw)
    }

    /// Short name of the failure, as a host would print it
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "Ok",
            ErrorCode::AllocationFailure => "AllocationFailure",
            ErrorCode::ProtectionFailure => "ProtectionFailure",
            ErrorCode::ReleaseFailure => "ReleaseFailure",
            ErrorCode::SizeMismatch => "SizeMismatch",
            ErrorCode::InvalidHandle => "InvalidHandle",
        }
    }

    /// Static message for the code
    pub fn message(self) -> &'static str {
        self.c_message().to_str().unwrap_or_default()
    }

    /// Static message for the code, NUL-terminated for C callers
    pub fn c_message(self) -> &'static CStr {
        match self {
            ErrorCode::Ok => c"success",
            ErrorCode::AllocationFailure => c"allocating jitted function failed",
            ErrorCode::ProtectionFailure => c"making jitted function executable failed",
            ErrorCode::ReleaseFailure => c"releasing jitted function failed",
            ErrorCode::SizeMismatch => c"code length is zero or does not match the region",
            ErrorCode::InvalidHandle => c"handle is null, released, or unknown",
        }
    }
}

impl<T> From<&LoadResult<T>> for ErrorCode {
    fn from(result: &LoadResult<T>) -> Self {
        match result {
            Ok(_) => ErrorCode::Ok,
            Err(e) => e.code(),
        }
    }
}

/// Description of the exception class a binding layer registers
///
/// Every loader failure maps onto one class, derived from a shared base so a
/// host can tell loader errors apart from unrelated ones.
#[derive(Debug)]
pub struct ErrorClass {
    /// Fully qualified name of the shared base class
    pub base: &'static CStr,
    /// Fully qualified name of the loader's class
    pub name: &'static CStr,
    /// Codes the class can carry, with their messages
    pub codes: Vec<(ErrorCode, &'static str)>,
}

static ERROR_CLASS: OnceLock<ErrorClass> = OnceLock::new();

/// The process-wide error class, built on first use
pub fn error_class() -> &'static ErrorClass {
    ERROR_CLASS.get_or_init(|| {
        tracing::debug!("registering loader error class");
        ErrorClass {
            base: c"rejit.common.RejitError",
            name: c"loadcode.LoadCodeError",
            codes: ErrorCode::ALL
                .into_iter()
                .filter(|code| *code != ErrorCode::Ok)
                .map(|code| (code, code.message()))
                .collect(),
        }
    })
}

/// A failed unload
///
/// The region is still mapped, so the function is handed back. Retry with
/// [`Function::unload`] or give up with [`Function::leak`].
#[derive(Error)]
#[error("{error}")]
pub struct UnloadError<B: Backend> {
    function: Function<B>,
    error: LoadError,
}

impl<B: Backend> UnloadError<B> {
    pub(crate) fn new(function: Function<B>, error: LoadError) -> Self {
        Self { function, error }
    }

    /// The underlying OS failure
    pub fn error(&self) -> &LoadError {
        &self.error
    }

    /// Take back the still-live function
    pub fn into_function(self) -> Function<B> {
        self.function
    }

    /// Split into the function and the error
    pub fn into_parts(self) -> (Function<B>, LoadError) {
        (self.function, self.error)
    }
}

impl<B: Backend> std::fmt::Debug for UnloadError<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnloadError")
            .field("function", &self.function)
            .field("error", &self.error)
            .finish()
    }
}

impl<B: Backend> From<UnloadError<B>> for LoadError {
    fn from(e: UnloadError<B>) -> Self {
        let (function, error) = e.into_parts();
        // The caller chose to drop the handle; let Drop retry and log.
        drop(function);
        error
    }
}
