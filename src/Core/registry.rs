use crate::error::{RenderError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle value that is never issued; C callers read it as "no context".
pub const INVALID_HANDLE: u64 = 0;

/// Process-wide table mapping opaque integer handles to owned values.
///
/// Handles come from a monotonically increasing counter starting at 1, so a
/// released handle is never handed out again and a stale handle can only
/// ever miss. The map lock is held for the map operation alone; callers that
/// need exclusive access to a value put their own lock inside `T`.
pub struct HandleRegistry<T> {
    entries: Mutex<HashMap<u64, Arc<T>>>,
    next_handle: AtomicU64,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Take ownership of `value` and return a fresh non-zero handle for it.
    pub fn register(&self, value: T) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(handle, INVALID_HANDLE);
        self.entries.lock().insert(handle, Arc::new(value));
        handle
    }

    /// Resolve a handle without giving up the registry's ownership.
    pub fn lookup(&self, handle: u64) -> Result<Arc<T>> {
        if handle == INVALID_HANDLE {
            return Err(RenderError::NotFound(handle));
        }
        self.entries
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(RenderError::NotFound(handle))
    }

    /// Remove the entry and hand the value to the caller for teardown.
    pub fn release(&self, handle: u64) -> Result<Arc<T>> {
        if handle == INVALID_HANDLE {
            return Err(RenderError::NotFound(handle));
        }
        self.entries
            .lock()
            .remove(&handle)
            .ok_or(RenderError::NotFound(handle))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Currently live handles, in ascending order.
    pub fn handles(&self) -> Vec<u64> {
        let mut handles: Vec<u64> = self.entries.lock().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// The handle the next `register` call will return.
    pub fn next_handle(&self) -> u64 {
        self.next_handle.load(Ordering::Relaxed)
    }
}
