use std::sync::{Mutex, MutexGuard, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Holds the process-environment lock and restores every touched variable on drop.
pub(crate) struct ScopedEnv {
    saved: Vec<(String, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl ScopedEnv {
    /// Takes the environment lock. A poisoned lock is recovered.
    pub(crate) fn lock() -> Self {
        let lock = env_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            saved: Vec::new(),
            _lock: lock,
        }
    }

    fn remember(&mut self, key: &str) {
        if !self.saved.iter().any(|(saved, _)| saved == key) {
            self.saved.push((key.to_string(), std::env::var(key).ok()));
        }
    }

    /// Sets `key` for the lifetime of this guard.
    pub(crate) fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.remember(key);
        // SAFETY: mutation is serialized by the env lock held by `self`.
        unsafe {
            std::env::set_var(key, value);
        }
        self
    }

    /// Removes `key` for the lifetime of this guard.
    pub(crate) fn remove(&mut self, key: &str) -> &mut Self {
        self.remember(key);
        // SAFETY: mutation is serialized by the env lock held by `self`.
        unsafe {
            std::env::remove_var(key);
        }
        self
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            // SAFETY: the env lock is still held; `_lock` drops after this body.
            unsafe {
                match value {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_env_restores_previous_values() {
        let key = "GEMCHAT_TEST_SUPPORT_PROBE";
        let mut env = ScopedEnv::lock();
        env.set(key, "during").set(key, "again");
        assert_eq!(std::env::var(key).as_deref(), Ok("again"));
        drop(env);
        assert!(std::env::var(key).is_err());
    }
}
