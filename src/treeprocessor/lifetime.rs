//! In-flight counting with deferred teardown.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    active: usize,
    retiring: bool,
    retired: bool,
}

/// Counts users of a resource. Once retirement is requested no new user
/// may enter, and exactly one caller (the retiring one, or the last user
/// to exit) is told to tear the resource down.
#[derive(Debug, Default)]
pub struct Lifetime {
    state: Mutex<State>,
    idle: Condvar,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a user. Fails once retirement has been requested.
    pub fn enter(&self) -> bool {
        let mut state = self.lock();
        if state.retiring {
            return false;
        }
        state.active += 1;
        true
    }

    /// Unregister a user. Returns true when the caller must tear down.
    pub fn exit(&self) -> bool {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        if state.active > 0 {
            return false;
        }
        self.idle.notify_all();
        if state.retiring && !state.retired {
            state.retired = true;
            return true;
        }
        false
    }

    /// Request retirement. Returns true when the caller must tear down now.
    pub fn retire(&self) -> bool {
        let mut state = self.lock();
        state.retiring = true;
        if state.active == 0 && !state.retired {
            state.retired = true;
            return true;
        }
        false
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    pub fn is_retiring(&self) -> bool {
        self.lock().retiring
    }

    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    /// Block until no user is active. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .idle
            .wait_timeout_while(state, timeout, |s| s.active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.active == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_retire_when_idle() {
        let lifetime = Lifetime::new();
        assert!(lifetime.retire());
        assert!(lifetime.is_retired());
        assert!(!lifetime.enter());
        assert!(!lifetime.retire());
    }

    #[test]
    fn test_last_exit_tears_down() {
        let lifetime = Lifetime::new();
        assert!(lifetime.enter());
        assert!(lifetime.enter());
        assert!(!lifetime.retire());
        assert!(!lifetime.enter());
        assert!(!lifetime.exit());
        assert!(!lifetime.is_retired());
        assert!(lifetime.exit());
        assert!(lifetime.is_retired());
        assert!(lifetime.wait_idle(Duration::from_millis(1)));
    }
}
