// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock backend for testing
//!
//! Delegates to the native backend so code really runs, while counting
//! calls and failing on demand. State is per thread, so tests running in
//! parallel do not see each other's counters.

use std::{cell::Cell, ptr::NonNull};

use super::{Backend, NativeBackend};
use crate::error::{LoadError, LoadResult};

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    static RELEASES: Cell<usize> = const { Cell::new(0) };
    static FAIL_ALLOCATE: Cell<bool> = const { Cell::new(false) };
    static FAIL_PROTECT: Cell<bool> = const { Cell::new(false) };
    static FAIL_RELEASE: Cell<bool> = const { Cell::new(false) };
}

/// Counting, failure-injecting backend
pub(crate) struct MockBackend;

impl MockBackend {
    /// Clear counters and pending failures for this thread
    pub(crate) fn reset() {
        ALLOCATIONS.set(0);
        RELEASES.set(0);
        FAIL_ALLOCATE.set(false);
        FAIL_PROTECT.set(false);
        FAIL_RELEASE.set(false);
    }

    /// Number of successful allocations
    pub(crate) fn allocations() -> usize {
        ALLOCATIONS.get()
    }

    /// Regions allocated but not yet released
    pub(crate) fn live() -> usize {
        ALLOCATIONS.get() - RELEASES.get()
    }

    /// Fail the next `allocate`
    pub(crate) fn fail_next_allocate() {
        FAIL_ALLOCATE.set(true);
    }

    /// Fail the next `protect`
    pub(crate) fn fail_next_protect() {
        FAIL_PROTECT.set(true);
    }

    /// Fail the next `release`
    pub(crate) fn fail_next_release() {
        FAIL_RELEASE.set(true);
    }
}

impl Backend for MockBackend {
    const NAME: &'static str = "mock";

    fn allocate(len: usize) -> LoadResult<NonNull<u8>> {
        if FAIL_ALLOCATE.replace(false) {
            return Err(LoadError::AllocationFailure {
                size: len,
                reason: "injected failure".into(),
            });
        }
        let base = NativeBackend::allocate(len)?;
        ALLOCATIONS.set(ALLOCATIONS.get() + 1);
        Ok(base)
    }

    unsafe fn protect(base: NonNull<u8>, len: usize) -> LoadResult<()> {
        if FAIL_PROTECT.replace(false) {
            return Err(LoadError::ProtectionFailure {
                reason: "injected failure".into(),
            });
        }
        NativeBackend::protect(base, len)
    }

    unsafe fn release(base: NonNull<u8>, len: usize) -> LoadResult<()> {
        if FAIL_RELEASE.replace(false) {
            return Err(LoadError::ReleaseFailure {
                reason: "injected failure".into(),
            });
        }
        NativeBackend::release(base, len)?;
        RELEASES.set(RELEASES.get() + 1);
        Ok(())
    }

    unsafe fn flush_icache(base: NonNull<u8>, len: usize) {
        NativeBackend::flush_icache(base, len)
    }
}
