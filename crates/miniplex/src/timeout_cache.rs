//! An insertion-ordered set of keys with activity-refresh TTL.
//!
//! `Add` either inserts a fresh key or refreshes an existing one's
//! last-access timestamp; keys that go `timeout` without a refresh are
//! dropped and reported through a caller-supplied scheduler callback. The
//! cache is not thread-safe on its own — callers are expected to confine all
//! access to a single serial domain, matching the strand model the rest of
//! this crate uses.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Schedules a wake-up: `scheduler(key, after)` must arrange for
/// [`TimeoutCache::on_wake`] to be called with `key` no sooner than `after`
/// has elapsed, on the same serial domain that owns the cache.
pub type Scheduler<K> = Arc<dyn Fn(K, Duration) + Send + Sync>;

struct Node<K> {
    key: K,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Activity-refresh TTL set, preserving first-insertion order.
///
/// Internally a slab of nodes linked into a doubly-linked list so that
/// expiry removes a key in O(1) regardless of how many keys the cache
/// currently holds.
pub struct TimeoutCache<K> {
    timeout: Duration,
    scheduler: Scheduler<K>,
    slots: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K> TimeoutCache<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(timeout: Duration, scheduler: Scheduler<K>) -> Self {
        Self {
            timeout,
            scheduler,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Inserts `key` if absent (returning `true`) or refreshes its
    /// last-access timestamp if present (returning `false`).
    pub fn add(&mut self, key: K) -> bool {
        let now = Instant::now();
        if let Some(&idx) = self.index.get(&key) {
            self.slots[idx].as_mut().expect("indexed slot is live").last_access = now;
            return false;
        }

        let idx = self.alloc(Node {
            key: key.clone(),
            last_access: now,
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            self.slots[tail].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.index.insert(key.clone(), idx);

        (self.scheduler)(key, self.timeout);
        true
    }

    /// Whether `key` is currently present.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Snapshot of keys in first-insertion order.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut cur = self.head;
        while let Some(idx) = cur {
            let node = self.slots[idx].as_ref().expect("indexed slot is live");
            out.push(node.key.clone());
            cur = node.next;
        }
        out
    }

    /// Drops every key. Any timers already in flight become no-ops: when
    /// they eventually call [`Self::on_wake`], the key will no longer be in
    /// `index` and the call returns `None`.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Called by the scheduler once `timeout` has elapsed since a key's
    /// insertion or last refresh. Returns `Some(key)` if the key genuinely
    /// expired (and has been removed), or `None` if it was already gone or
    /// had been refreshed since the timer was armed (in which case a new
    /// timer for the remaining interval has been scheduled).
    pub fn on_wake(&mut self, key: K) -> Option<K> {
        let &idx = self.index.get(&key)?;
        let elapsed = self.slots[idx].as_ref().unwrap().last_access.elapsed();
        if elapsed >= self.timeout {
            self.unlink(idx);
            Some(key)
        } else {
            let remaining = self.timeout - elapsed;
            (self.scheduler)(key, remaining);
            None
        }
    }

    fn alloc(&mut self, node: Node<K>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    fn unlink(&mut self, idx: usize) {
        let node = self.slots[idx].take().expect("unlink of live slot");
        match node.prev {
            Some(prev) => self.slots[prev].as_mut().unwrap().next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.slots[next].as_mut().unwrap().prev = node.prev,
            None => self.tail = node.prev,
        }
        self.index.remove(&node.key);
        self.free.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn noop_scheduler<K: Send + 'static>() -> Scheduler<K> {
        Arc::new(|_, _| {})
    }

    #[test]
    fn add_inserts_then_refreshes() {
        let mut cache = TimeoutCache::new(Duration::from_secs(10), noop_scheduler());
        assert!(cache.add("a"));
        assert!(!cache.add("a"));
        assert_eq!(cache.keys(), vec!["a"]);
    }

    #[test]
    fn keys_preserve_insertion_order_across_refresh() {
        let mut cache = TimeoutCache::new(Duration::from_secs(10), noop_scheduler());
        cache.add("a");
        cache.add("b");
        cache.add("c");
        cache.add("b"); // refresh, must not move position
        assert_eq!(cache.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn on_wake_rearms_when_refreshed_since_arming() {
        let mut cache = TimeoutCache::new(Duration::from_millis(50), noop_scheduler());
        cache.add("a");
        std::thread::sleep(Duration::from_millis(10));
        cache.add("a"); // refresh pushes the real deadline out
        assert_eq!(cache.on_wake("a"), None);
        assert!(cache.contains(&"a"));
    }

    #[test]
    fn on_wake_expires_when_untouched() {
        let mut cache = TimeoutCache::new(Duration::from_millis(10), noop_scheduler());
        cache.add("a");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.on_wake("a"), Some("a"));
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn on_wake_on_stale_key_is_a_noop() {
        let mut cache: TimeoutCache<&str> = TimeoutCache::new(Duration::from_secs(10), noop_scheduler());
        assert_eq!(cache.on_wake("ghost"), None);
    }

    #[test]
    fn clear_drops_everything_and_future_wakes_are_noops() {
        let mut cache = TimeoutCache::new(Duration::from_secs(10), noop_scheduler());
        cache.add("a");
        cache.add("b");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.on_wake("a"), None);
    }

    #[test]
    fn scheduler_is_invoked_on_insert_and_rearm() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = calls.clone();
        let scheduler: Scheduler<&str> = Arc::new(move |k, d| calls2.lock().unwrap().push((k, d)));
        let mut cache = TimeoutCache::new(Duration::from_millis(30), scheduler);
        cache.add("a");
        std::thread::sleep(Duration::from_millis(5));
        cache.add("a");
        cache.on_wake("a");
        assert_eq!(calls.lock().unwrap().len(), 2); // initial schedule + rearm
    }

    #[test]
    fn unlinking_middle_node_preserves_order_of_remainder() {
        let mut cache = TimeoutCache::new(Duration::from_millis(10), noop_scheduler());
        cache.add("a");
        cache.add("b");
        cache.add("c");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.on_wake("b"), Some("b"));
        assert_eq!(cache.keys(), vec!["a", "c"]);
    }
}
