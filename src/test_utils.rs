use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Serializes tests that set or remove environment variables referenced by
/// settings files.
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
