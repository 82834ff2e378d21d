// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Loaded functions
//!
//! A [`Function`] owns a sealed code region and calls into it through the
//! single supported entry signature:
//!
//! ```c
//! int f(const char *data, size_t length);
//! ```

use std::{ffi::c_int, fmt, mem, ptr::NonNull};

use crate::{
    error::{LoadResult, UnloadError},
    region::{Backend, NativeBackend, Region, State},
};

/// Native signature of every loaded function
pub type EntryFn = unsafe extern "C" fn(data: *const u8, length: usize) -> c_int;

/// Owned handle to loaded machine code
///
/// Not `Clone`: the region is released exactly once, either by
/// [`Function::unload`] or when the handle is dropped. Share it behind an
/// `Arc` or a [`FunctionTable`](crate::FunctionTable).
pub struct Function<B: Backend = NativeBackend> {
    region: Region<B>,
}

impl Function<NativeBackend> {
    /// Load `code` with the native backend
    ///
    /// Allocates a region of exactly `code.len()` bytes, copies the code in,
    /// and seals the region read+execute. Any region allocated on the way is
    /// released again if a later step fails.
    pub fn load(code: &[u8]) -> LoadResult<Self> {
        Self::load_with(code)
    }
}

impl<B: Backend> Function<B> {
    /// Load `code` with the backend `B`
    pub fn load_with(code: &[u8]) -> LoadResult<Self> {
        let mut region = Region::<B>::allocate(code.len())?;
        region.install(code)?;
        region.seal()?;
        Ok(Self { region })
    }

    /// Call the loaded code with `data`
    ///
    /// Returns the code's `int` result unchanged.
    ///
    /// # Safety
    ///
    /// The caller must ensure the loaded bytes are valid machine code for
    /// this target that follows the C calling convention for [`EntryFn`],
    /// and that it only reads `data.len()` bytes from `data`.
    #[inline]
    pub unsafe fn call(&self, data: &[u8]) -> i32 {
        self.call_raw(data.as_ptr(), data.len())
    }

    /// Call the loaded code with a raw pointer and length
    ///
    /// # Safety
    ///
    /// Everything [`Function::call`] requires, and `data` must be valid for
    /// whatever the code reads given `length`.
    #[inline]
    pub unsafe fn call_raw(&self, data: *const u8, length: usize) -> i32 {
        debug_assert_eq!(self.region.state(), State::Executable);
        let entry: EntryFn = mem::transmute::<*mut u8, EntryFn>(self.region.base().as_ptr());
        entry(data, length)
    }

    /// Release the code region
    ///
    /// If the OS refuses, the function is handed back inside the error so the
    /// caller can retry or leak it.
    pub fn unload(mut self) -> Result<(), UnloadError<B>> {
        match self.release() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(backend = B::NAME, error = %e, "unload failed");
                Err(UnloadError::new(self, e))
            }
        }
    }

    /// Release the region in place, leaving `self` allocated
    ///
    /// Used where the handle's own storage must survive a failed release.
    pub(crate) fn release(&mut self) -> LoadResult<()> {
        self.region.release()
    }

    /// Give up the region without releasing it
    ///
    /// Returns the entry address, which stays executable for the rest of
    /// the process.
    pub fn leak(self) -> NonNull<u8> {
        self.region.leak()
    }

    /// Address of the first instruction
    pub fn entry(&self) -> NonNull<u8> {
        self.region.base()
    }

    /// Size of the code region in bytes
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Always false: empty code is rejected at load time
    pub fn is_empty(&self) -> bool {
        self.region.len() == 0
    }

    /// Lifecycle state of the region
    pub fn state(&self) -> State {
        self.region.state()
    }
}

impl<B: Backend> fmt::Debug for Function<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("region", &self.region)
            .finish()
    }
}
