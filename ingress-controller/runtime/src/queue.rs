use crate::k8s;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::Notify, time::Duration};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// A bounded queue of reconcile keys with a single consumer.
///
/// A key that is already waiting is not queued again, so a burst of watch events for
/// the same resource results in a single sync. When the queue is full, new keys are
/// dropped: every sync rebuilds the whole configuration, so any waiting key covers
/// the dropped one.
#[derive(Clone, Debug)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
}

#[derive(Debug, Default)]
struct State {
    keys: VecDeque<String>,
    queued: HashSet<String>,
    failures: HashMap<String, u32>,
    shut_down: bool,
}

// === impl WorkQueue ===

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Queues `key`, returning whether it was added.
    pub fn add(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        {
            let mut state = self.inner.state.lock();
            if state.shut_down || state.queued.contains(&key) {
                return false;
            }
            if state.keys.len() >= self.inner.capacity {
                tracing::debug!(%key, "Queue full; dropping key");
                return false;
            }
            state.queued.insert(key.clone());
            state.keys.push_back(key);
        }
        self.inner.notify.notify_one();
        true
    }

    /// Queues `key` once `delay` has elapsed.
    ///
    /// If the key is then dropped, its failure history is dropped with it.
    pub fn requeue_after(&self, key: String, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !queue.add(key.clone()) {
                let mut state = queue.inner.state.lock();
                if !state.queued.contains(&key) {
                    state.failures.remove(&key);
                }
            }
        });
    }

    /// Records a failed sync of `key` and returns how long to wait before retrying it.
    ///
    /// The delay doubles with each consecutive failure.
    pub fn backoff(&self, key: &str) -> Duration {
        let mut state = self.inner.state.lock();
        let failures = state.failures.entry(key.to_string()).or_default();
        let delay = BACKOFF_BASE
            .checked_mul(2u32.saturating_pow(*failures))
            .map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX));
        *failures = failures.saturating_add(1);
        delay
    }

    /// Clears the failure history of `key` after a successful sync.
    pub fn forget(&self, key: &str) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue has been shut down, even if keys remain.
    pub async fn next(&self) -> Option<String> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.keys.pop_front() {
                    state.queued.remove(&key);
                    return Some(key);
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stops accepting keys and wakes the consumer.
    pub fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        state.failures.clear();
        drop(state);
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every watch event on a namespaced resource queues that resource's key.
impl<R> IndexNamespacedResource<R> for WorkQueue
where
    R: k8s::ResourceExt,
{
    fn apply(&mut self, resource: R) {
        let key = match resource.namespace() {
            Some(ns) => format!("{}/{}", ns, resource.name_any()),
            None => resource.name_any(),
        };
        self.add(key);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.add(format!("{}/{}", namespace, name));
    }
}

impl IndexClusterResource<k8s::Node> for WorkQueue {
    fn apply(&mut self, node: k8s::Node) {
        self.add(k8s::ResourceExt::name_any(&node));
    }

    fn delete(&mut self, name: String) {
        self.add(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_queued_keys() {
        let queue = WorkQueue::new(10);
        assert!(queue.add("default/alpha"));
        assert!(queue.add("default/bravo"));
        assert!(!queue.add("default/alpha"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await.as_deref(), Some("default/alpha"));
        // Once taken, a key may be queued again.
        assert!(queue.add("default/alpha"));
        assert_eq!(queue.next().await.as_deref(), Some("default/bravo"));
        assert_eq!(queue.next().await.as_deref(), Some("default/alpha"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn drops_keys_when_full() {
        let queue = WorkQueue::new(2);
        assert!(queue.add("a"));
        assert!(queue.add("b"));
        assert!(!queue.add("c"));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn shut_down_wakes_consumer() {
        let queue = WorkQueue::new(10);
        let next = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;

        queue.shut_down();
        assert_eq!(next.await.unwrap(), None);
        assert!(!queue.add("a"));
    }

    #[tokio::test]
    async fn shut_down_discards_waiting_keys() {
        let queue = WorkQueue::new(10);
        queue.add("a");
        queue.shut_down();
        assert_eq!(queue.next().await, None);
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let queue = WorkQueue::new(10);
        let delays = (0..11)
            .map(|_| queue.backoff("a").as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);

        // Other keys are unaffected, and forgetting resets the delay.
        assert_eq!(queue.backoff("b"), Duration::from_secs(1));
        queue.forget("a");
        assert_eq!(queue.backoff("a"), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn requeues_after_delay() {
        let queue = WorkQueue::new(10);
        queue.requeue_after("a".to_string(), Duration::from_secs(5));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.next().await.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_requeue_forgets_failures() {
        let queue = WorkQueue::new(1);
        let delay = queue.backoff("a");
        assert_eq!(queue.backoff("a"), Duration::from_secs(2));
        assert!(queue.add("b"));

        queue.requeue_after("a".to_string(), delay);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.backoff("a"), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_of_waiting_key_keeps_failures() {
        let queue = WorkQueue::new(10);
        queue.backoff("a");
        assert!(queue.add("a"));

        queue.requeue_after("a".to_string(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.backoff("a"), Duration::from_secs(2));
    }

    #[test]
    fn shut_down_forgets_failures() {
        let queue = WorkQueue::new(10);
        queue.backoff("a");
        queue.shut_down();
        assert_eq!(queue.backoff("a"), Duration::from_secs(1));
    }
}
