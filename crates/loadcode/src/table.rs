// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared function table
//!
//! Hands out plain ids for loaded functions so that several threads, or a
//! host language holding integers, can use them without owning them.
//!
//! # Lifetime Management
//!
//! Each entry is an `Arc<Function>`. A call clones the `Arc` under the lock,
//! drops the lock, then runs the code, so a slow call never blocks other
//! threads. Unloading removes the id at once; the region itself is released
//! when the last in-flight call finishes and drops its `Arc`.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    error::{LoadError, LoadResult},
    function::Function,
    region::{Backend, NativeBackend},
};

/// Identifier of a function in a [`FunctionTable`]
///
/// Ids are never reused, so a stale id cannot reach a newer function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    /// Raw id value, for handing to a host
    pub fn get(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its raw value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Table of loaded functions addressed by id
pub struct FunctionTable<B: Backend = NativeBackend> {
    functions: Mutex<HashMap<FunctionId, Arc<Function<B>>>>,
    next_id: AtomicU64,
}

impl<B: Backend> Default for FunctionTable<B> {
    fn default() -> Self {
        Self {
            functions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl FunctionTable<NativeBackend> {
    /// Create an empty table using the native backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> FunctionTable<B> {
    /// Load `code` and register it
    pub fn load(&self, code: &[u8]) -> LoadResult<FunctionId> {
        let function = Function::<B>::load_with(code)?;
        let id = FunctionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, Arc::new(function));
        tracing::debug!(%id, len = code.len(), "registered function");
        Ok(id)
    }

    /// Call the function registered under `id`
    ///
    /// Returns `InvalidHandle` if `id` was never loaded or has been unloaded.
    ///
    /// # Safety
    ///
    /// Same contract as [`Function::call`].
    pub unsafe fn call(&self, id: FunctionId, data: &[u8]) -> LoadResult<i32> {
        let function = self.get(id)?;
        Ok(function.call(data))
    }

    /// Get a shared reference to the function registered under `id`
    ///
    /// The region stays mapped while the returned `Arc` is alive, even if
    /// `id` is unloaded in the meantime.
    pub fn get(&self, id: FunctionId) -> LoadResult<Arc<Function<B>>> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| LoadError::invalid_handle(format!("{id} is not loaded")))
    }

    /// Unregister `id` and release its region
    ///
    /// With no call in flight the region is released right away; if that
    /// fails the function is put back under the same id and the error is
    /// returned, so the unload can be retried. With calls in flight the
    /// release happens when the last one finishes.
    ///
    /// `Ok(())` therefore means the id is gone, not that the region is
    /// unmapped. A deferred release that fails cannot be reported here; it is
    /// logged at error level and the region is leaked.
    ///
    /// Unloading an id twice returns `InvalidHandle`.
    pub fn unload(&self, id: FunctionId) -> LoadResult<()> {
        let shared = self
            .lock()
            .remove(&id)
            .ok_or_else(|| LoadError::invalid_handle(format!("{id} is not loaded")))?;

        let function = match Arc::try_unwrap(shared) {
            Ok(function) => function,
            Err(_) => {
                tracing::debug!(%id, "unload deferred until in-flight calls finish");
                return Ok(());
            }
        };

        match function.unload() {
            Ok(()) => {
                tracing::debug!(%id, "unloaded function");
                Ok(())
            }
            Err(e) => {
                let (function, error) = e.into_parts();
                self.lock().insert(id, Arc::new(function));
                Err(error)
            }
        }
    }

    /// Check whether `id` is currently loaded
    pub fn contains(&self, id: FunctionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of loaded functions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FunctionId, Arc<Function<B>>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.functions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: Backend> fmt::Debug for FunctionTable<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
