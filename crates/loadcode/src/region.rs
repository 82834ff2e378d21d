// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Code regions: OS memory that holds one piece of machine code
//!
//! # Platform-Specific Implementation
//!
//! - **Unix**: `mmap` RW anonymous mapping, `mprotect` to RX, `munmap` with the stored length
//! - **Windows**: `VirtualAlloc` RW pages, `VirtualProtect` to RX, `VirtualFree` by base address
//!
//! A region is never writable and executable at the same time. It starts
//! writable, receives its code exactly once, and is then sealed read+execute
//! for the rest of its life.

#[cfg(test)]
pub(crate) mod mock;

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::Mmap;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::VirtualMemory;

#[cfg(not(any(unix, windows)))]
compile_error!("code regions are only supported on Unix and Windows");

use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::error::{LoadError, LoadResult};

/// The backend selected for this target
#[cfg(unix)]
pub type NativeBackend = Mmap;

/// The backend selected for this target
#[cfg(windows)]
pub type NativeBackend = VirtualMemory;

/// OS services needed to manage a code region
///
/// Implementations are zero-sized markers; the region keeps all state.
pub trait Backend: 'static {
    /// Name used in logs
    const NAME: &'static str;

    /// Map `len` bytes of fresh, zeroed, read+write memory.
    ///
    /// `len` is never zero.
    fn allocate(len: usize) -> LoadResult<NonNull<u8>>;

    /// Switch `[base, base + len)` from read+write to read+execute.
    ///
    /// # Safety
    ///
    /// `base` and `len` must describe a live region returned by `allocate`.
    unsafe fn protect(base: NonNull<u8>, len: usize) -> LoadResult<()>;

    /// Return the region to the OS.
    ///
    /// # Safety
    ///
    /// `base` and `len` must describe a live region returned by `allocate`,
    /// and nothing may use the region afterwards.
    unsafe fn release(base: NonNull<u8>, len: usize) -> LoadResult<()>;

    /// Make freshly written code visible to instruction fetch.
    ///
    /// # Safety
    ///
    /// `base` and `len` must describe a live region returned by `allocate`.
    unsafe fn flush_icache(_base: NonNull<u8>, _len: usize) {}
}

/// Lifecycle state of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Mapped read+write, code may be installed
    Writable,
    /// Sealed read+execute, code may be called
    Executable,
    /// Returned to the OS
    Released,
}

/// A block of OS memory holding one piece of code
///
/// Dropping a region that has not been released releases it. If that fails
/// the mapping is leaked and an error is logged.
pub(crate) struct Region<B: Backend> {
    base: NonNull<u8>,
    len: usize,
    state: State,
    _backend: PhantomData<fn() -> B>,
}

// Safety: Region owns its mapping exclusively. Mutation (install, seal,
// release) takes &mut self; once sealed the memory is read-only.
unsafe impl<B: Backend> Send for Region<B> {}
unsafe impl<B: Backend> Sync for Region<B> {}

impl<B: Backend> Region<B> {
    /// Allocate a writable region of exactly `len` bytes
    pub(crate) fn allocate(len: usize) -> LoadResult<Self> {
        // An empty region has no entry point.
        if len == 0 {
            return Err(LoadError::SizeMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let base = B::allocate(len)?;
        tracing::debug!(backend = B::NAME, ?base, len, "allocated code region");

        Ok(Self {
            base,
            len,
            state: State::Writable,
            _backend: PhantomData,
        })
    }

    /// Copy `code` into the region
    ///
    /// `code` must be exactly as long as the region.
    pub(crate) fn install(&mut self, code: &[u8]) -> LoadResult<()> {
        if self.state != State::Writable {
            return Err(LoadError::invalid_handle(format!(
                "cannot install code into a region that is {:?}",
                self.state
            )));
        }
        if code.len() != self.len {
            return Err(LoadError::SizeMismatch {
                expected: self.len,
                actual: code.len(),
            });
        }

        // Safety: the region is live, writable, and exactly `code.len()` bytes.
        // A fresh mapping cannot overlap a borrowed slice.
        unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), self.base.as_ptr(), code.len()) };

        Ok(())
    }

    /// Drop write access and grant execute access
    pub(crate) fn seal(&mut self) -> LoadResult<()> {
        if self.state != State::Writable {
            return Err(LoadError::invalid_handle(format!(
                "cannot seal a region that is {:?}",
                self.state
            )));
        }

        // Safety: base/len come from B::allocate and the region is live.
        unsafe {
            B::protect(self.base, self.len)?;
            B::flush_icache(self.base, self.len);
        }
        self.state = State::Executable;
        tracing::debug!(backend = B::NAME, base = ?self.base, len = self.len, "sealed code region");

        Ok(())
    }

    /// Return the memory to the OS
    ///
    /// On failure the region stays live and may be released again.
    pub(crate) fn release(&mut self) -> LoadResult<()> {
        if self.state == State::Released {
            return Err(LoadError::invalid_handle("region already released"));
        }

        // Safety: base/len come from B::allocate, the region has not been
        // released, and the caller gives up access by releasing.
        unsafe { B::release(self.base, self.len) }?;
        self.state = State::Released;
        tracing::debug!(
            backend = B::NAME,
            base = ?self.base,
            len = self.len,
            "released code region"
        );

        Ok(())
    }

    /// Give up the mapping without releasing it
    pub(crate) fn leak(mut self) -> NonNull<u8> {
        tracing::warn!(backend = B::NAME, base = ?self.base, len = self.len, "leaking code region");
        self.state = State::Released;
        self.base
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }
}

impl<B: Backend> fmt::Debug for Region<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("backend", &B::NAME)
            .field("base", &self.base)
            .field("len", &self.len)
            .field("state", &self.state)
            .finish()
    }
}

impl<B: Backend> Drop for Region<B> {
    fn drop(&mut self) {
        if self.state == State::Released {
            return;
        }
        if let Err(e) = self.release() {
            tracing::error!(
                backend = B::NAME,
                base = ?self.base,
                len = self.len,
                error = %e,
                "failed to release code region on drop, leaking it"
            );
        }
    }
}
