//! Process-wide designation of a single "main" thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::RwLock;

static MAIN_THREAD_SET: AtomicBool = AtomicBool::new(false);
static MAIN_THREAD_ID: RwLock<Option<ThreadId>> = parking_lot::const_rwlock(None);

/// Marks the calling thread as the process main thread.
///
/// Meant to be called once. A later call from a different thread replaces
/// the designation (last writer wins) and is logged.
pub fn set_as_main_thread() {
    let current = thread::current().id();
    let mut slot = MAIN_THREAD_ID.write();
    if let Some(previous) = *slot {
        if previous != current {
            tracing::warn!(?previous, ?current, "main thread re-designated");
        }
    }
    *slot = Some(current);
    MAIN_THREAD_SET.store(true, Ordering::Release);
}

/// True when called from the thread last passed through [`set_as_main_thread`].
pub fn is_main_thread() -> bool {
    if !MAIN_THREAD_SET.load(Ordering::Acquire) {
        return false;
    }
    *MAIN_THREAD_ID.read() == Some(thread::current().id())
}

/// True once any thread has been designated main.
pub fn main_thread_set() -> bool {
    MAIN_THREAD_SET.load(Ordering::Acquire)
}
