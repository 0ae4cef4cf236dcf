//! Process-wide lock serializing entry into the script runtime.
//!
//! Any thread that is about to run script code holds this lock for the
//! duration of the call. It is reentrant because script callbacks routinely
//! call back into host code that takes it again.

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static SCRIPT_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

pub type ScriptLockGuard = ReentrantMutexGuard<'static, ()>;

pub fn lock_script() -> ScriptLockGuard {
    SCRIPT_LOCK.lock()
}

/// Returns `None` when another thread is inside the runtime.
pub fn try_lock_script() -> Option<ScriptLockGuard> {
    SCRIPT_LOCK.try_lock()
}
