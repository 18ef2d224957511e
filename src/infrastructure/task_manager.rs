use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Keyed delayed tasks with cancel-on-reschedule semantics.
///
/// Scheduling a key that already has a pending task aborts the pending one. Cancelling only
/// prevents a task from firing: once the delay elapses the work runs on its own task, so work
/// that reschedules its own key does not abort itself.
pub struct TaskManager<K> {
    handles: HashMap<K, JoinHandle<()>>,
}

impl<K> TaskManager<K>
where
    K: Copy + Eq + Hash,
{
    /// Create a new empty task manager
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Run `work` after `delay`, replacing whatever was pending under `key`
    pub fn schedule<F>(&mut self, key: K, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel(key);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(work);
        });
        self.handles.insert(key, handle);
    }

    /// Cancel the pending task for `key`; returns whether one was pending
    pub fn cancel(&mut self, key: K) -> bool {
        match self.handles.remove(&key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.handles
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Keys whose tasks have not fired yet
    pub fn pending(&self) -> Vec<K> {
        self.handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl<K> Default for TaskManager<K>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TaskManager<K> {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut tasks = TaskManager::new();

        for _ in 0..3 {
            let fired = fired.clone();
            tasks.schedule("resync", Duration::from_millis(500), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_abort_all() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut tasks = TaskManager::new();

        for key in ["a", "b", "c"] {
            let fired = fired.clone();
            tasks.schedule(key, Duration::from_secs(1), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(tasks.cancel("a"));
        assert!(!tasks.cancel("missing"));
        assert_eq!(tasks.pending().len(), 2);

        tasks.abort_all();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!tasks.is_scheduled("b"));
    }
}
