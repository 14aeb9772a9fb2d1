//! [`lock_api`]-based lock types backed by `parking_lot`.
//!
//! Everything reachable from more than one OS thread (thread handles, queues)
//! goes through these aliases, so the lock implementation can be swapped in
//! one place.

use lock_api::{Mutex, MutexGuard};

pub use parking_lot::{Condvar, RawMutex};
pub use std::sync::LazyLock;

pub type SharedMutex<T> = Mutex<RawMutex, T>;
pub type SharedMutexGuard<'a, T> = MutexGuard<'a, RawMutex, T>;
