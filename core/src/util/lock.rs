use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a heap mutex, recovering the guard if a previous holder panicked.
///
/// Heap tables stay structurally valid across a panic (every mutation is a
/// single map insert/remove), so a poisoned lock is still safe to reuse. The
/// top-level panic guard turns the panic itself into a halt.
#[inline]
pub fn lock_heap<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
