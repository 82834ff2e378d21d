// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unix backend using anonymous private `mmap`
//!
//! `munmap` needs the length of the mapping, so the region's stored length
//! is passed back on release.

use std::ptr::{self, NonNull};

use libc::{c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE};

use super::Backend;
use crate::error::{os_failure, LoadError, LoadResult};

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
extern "C" {
    fn __clear_cache(start: *mut c_void, end: *mut c_void);
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
extern "C" {
    fn sys_icache_invalidate(start: *mut c_void, len: libc::size_t);
}

/// Posix-mapped code regions
pub struct Mmap;

impl Backend for Mmap {
    const NAME: &'static str = "mmap";

    fn allocate(len: usize) -> LoadResult<NonNull<u8>> {
        //  Anonymous mappings want fd -1 and offset 0 on some implementations.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == MAP_FAILED {
            return Err(LoadError::AllocationFailure {
                size: len,
                reason: os_failure("mmap"),
            });
        }

        NonNull::new(base as *mut u8).ok_or_else(|| LoadError::AllocationFailure {
            size: len,
            reason: "mmap returned null".into(),
        })
    }

    unsafe fn protect(base: NonNull<u8>, len: usize) -> LoadResult<()> {
        if libc::mprotect(base.as_ptr() as *mut c_void, len, PROT_READ | PROT_EXEC) != 0 {
            return Err(LoadError::ProtectionFailure {
                reason: os_failure("mprotect"),
            });
        }
        Ok(())
    }

    unsafe fn release(base: NonNull<u8>, len: usize) -> LoadResult<()> {
        if libc::munmap(base.as_ptr() as *mut c_void, len) != 0 {
            return Err(LoadError::ReleaseFailure {
                reason: os_failure("munmap"),
            });
        }
        Ok(())
    }

    #[allow(unused_variables)]
    unsafe fn flush_icache(base: NonNull<u8>, len: usize) {
        // x86 keeps instruction fetch coherent with data writes.
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        __clear_cache(
            base.as_ptr() as *mut c_void,
            base.as_ptr().add(len) as *mut c_void,
        );

        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        sys_icache_invalidate(base.as_ptr() as *mut c_void, len);
    }
}
