//! Session-lifetime cache of tasks keyed by request.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::{lock, Task};

/// What happens to a cached task that finished with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The failed task stays cached and is handed out again.
    #[default]
    Keep,
    /// The failed task is dropped and the next lookup re-creates it.
    Evict,
}

type RetainFn<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Deduplicates tasks for immutable server-side resources.
///
/// At most one task is registered per key. Registration happens under the
/// map lock before the factory's task gets a chance to run, so concurrent
/// callers always share it.
pub struct ResourceCache<K, T> {
    name: &'static str,
    entries: Mutex<HashMap<K, Task<T>>>,
    enabled: AtomicBool,
    failure_policy: FailurePolicy,
    retain: Option<RetainFn<T>>,
}

impl<K, T> ResourceCache<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, failure_policy: FailurePolicy) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            failure_policy,
            retain: None,
        }
    }

    /// Only keeps successful results accepted by `retain`; others are
    /// re-requested on the next lookup.
    pub fn with_retention<F>(mut self, retain: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.retain = Some(Box::new(retain));
        self
    }

    /// Returns the task registered for `key`, or registers the one built by
    /// `factory`.
    ///
    /// While the cache is disabled the factory's task is returned without
    /// being registered.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> Task<T>
    where
        F: FnOnce() -> Task<T>,
    {
        if !self.is_enabled() {
            return factory();
        }

        let mut entries = lock(&self.entries);
        if let Some(task) = entries.get(&key) {
            if self.is_reusable(task) {
                debug!(cache = self.name, key = ?key, "Reusing cached task");
                return task.clone();
            }
            debug!(cache = self.name, key = ?key, "Replacing cached task");
        }

        let task = factory();
        entries.insert(key, task.clone());
        task
    }

    fn is_reusable(&self, task: &Task<T>) -> bool {
        if !task.is_done() {
            return true;
        }
        if let Some(error) = task.error() {
            return !error.is_cancelled() && self.failure_policy == FailurePolicy::Keep;
        }
        match (&self.retain, task.result()) {
            (Some(retain), Some(value)) => retain(&value),
            _ => true,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The task registered for `key`, without creating one.
    pub fn peek(&self, key: &K) -> Option<Task<T>> {
        lock(&self.entries).get(key).cloned()
    }
}

impl<K, T> fmt::Debug for ResourceCache<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("enabled", &self.enabled.load(Ordering::SeqCst))
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}
