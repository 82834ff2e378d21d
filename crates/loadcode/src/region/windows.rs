// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Windows backend using `VirtualAlloc`

use std::{
    ffi::c_void,
    ptr::{self, NonNull},
};

use windows_sys::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache,
    Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_EXECUTE_READ, PAGE_PROTECTION_FLAGS, PAGE_READWRITE,
    },
    Threading::GetCurrentProcess,
};

use super::Backend;
use crate::error::{os_failure, LoadError, LoadResult};

/// Virtual-allocation code regions
///
/// `VirtualFree` with `MEM_RELEASE` frees the whole reservation from its base
/// address and requires a size of zero, so the stored length is not used on
/// release.
pub struct VirtualMemory;

impl Backend for VirtualMemory {
    const NAME: &'static str = "virtual-alloc";

    fn allocate(len: usize) -> LoadResult<NonNull<u8>> {
        let base =
            unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

        // VirtualAlloc reports failure with NULL, not INVALID_HANDLE_VALUE.
        NonNull::new(base as *mut u8).ok_or_else(|| LoadError::AllocationFailure {
            size: len,
            reason: os_failure("VirtualAlloc"),
        })
    }

    unsafe fn protect(base: NonNull<u8>, len: usize) -> LoadResult<()> {
        let mut old: PAGE_PROTECTION_FLAGS = 0;
        if VirtualProtect(
            base.as_ptr() as *const c_void,
            len,
            PAGE_EXECUTE_READ,
            &mut old,
        ) == 0
        {
            return Err(LoadError::ProtectionFailure {
                reason: os_failure("VirtualProtect"),
            });
        }
        Ok(())
    }

    unsafe fn release(base: NonNull<u8>, _len: usize) -> LoadResult<()> {
        if VirtualFree(base.as_ptr() as *mut c_void, 0, MEM_RELEASE) == 0 {
            return Err(LoadError::ReleaseFailure {
                reason: os_failure("VirtualFree"),
            });
        }
        Ok(())
    }

    unsafe fn flush_icache(base: NonNull<u8>, len: usize) {
        if FlushInstructionCache(GetCurrentProcess(), base.as_ptr() as *const c_void, len) == 0 {
            tracing::warn!(reason = %os_failure("FlushInstructionCache"), "icache flush failed");
        }
    }
}
