//! Lock utilities for the synchronous core
//!
//! Helpers for common lock patterns with automatic release. A poisoned lock is
//! recovered rather than propagated: the data behind every lock in this crate
//! is only ever replaced wholesale, so a panic elsewhere never leaves it torn.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a mutex, recovering from poisoning
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire a read lock, recovering from poisoning
pub fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire a write lock, recovering from poisoning
pub fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Execute a closure with a Mutex lock, automatically releasing it
///
/// # Example
/// ```rust
/// use std::sync::Mutex;
/// use using_core::utils::with_lock;
///
/// let counter = Mutex::new(1);
/// let next = with_lock(&counter, |value| {
///     *value += 1;
///     *value
/// });
/// assert_eq!(next, 2);
/// ```
pub fn with_lock<T, F, R>(mutex: &Mutex<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    let mut guard = lock(mutex);
    f(&mut guard)
}

/// Execute a closure with a read lock, automatically releasing it
pub fn with_read_lock<T, F, R>(rwlock: &RwLock<T>, f: F) -> R
where
    F: FnOnce(&T) -> R,
{
    let guard = read(rwlock);
    f(&guard)
}

/// Execute a closure with a write lock, automatically releasing it
pub fn with_write_lock<T, F, R>(rwlock: &RwLock<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    let mut guard = write(rwlock);
    f(&mut guard)
}
