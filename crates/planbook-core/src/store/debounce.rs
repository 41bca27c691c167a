use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Per-key trailing-edge debounce on the local task set.
///
/// Scheduling a key aborts that key's pending wait and arms a new one. When a
/// wait elapses the action is spawned as its own task, so later calls can no
/// longer cancel it. Must be used from within a [`tokio::task::LocalSet`].
pub struct Debouncer<K> {
    delay: Duration,
    pending: Rc<RefCell<HashMap<K, JoinHandle<()>>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            pending: self.pending.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone + 'static> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Run `action` once `key` has been quiet for the configured delay.
    /// `action` is invoked when the wait elapses; the future it returns runs detached.
    pub fn schedule<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let pending = self.pending.clone();
        let deadline = tokio::time::Instant::now() + self.delay;
        let fired_key = key.clone();
        let wait = tokio::task::spawn_local(async move {
            tokio::time::sleep_until(deadline).await;
            pending.borrow_mut().remove(&fired_key);
            tokio::task::spawn_local(action());
        });
        if let Some(previous) = self.pending.borrow_mut().insert(key, wait) {
            previous.abort();
        }
    }

    /// Drop the pending action for `key`. Returns whether one was waiting.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.borrow_mut().remove(key) {
            Some(wait) => {
                wait.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.borrow().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}
