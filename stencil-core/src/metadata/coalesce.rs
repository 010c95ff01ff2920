//! At-most-one in-flight operation per key
//!
//! Concurrent fetches of the same metadata entry share one remote request:
//! the first caller runs the operation, everyone else awaits its published
//! result, success or failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use super::error::MetadataError;

type Slot<T> = Arc<OnceCell<Result<T, MetadataError>>>;

pub struct Coalescer<T> {
    inflight: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: Clone> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` for `key` unless a run for `key` is already in flight
    ///
    /// The slot is dropped from the table once its result is published, so a
    /// later call (for example after a failure) starts a fresh run.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> Result<T, MetadataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MetadataError>>,
    {
        let slot = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = slot.get_or_init(op).await.clone();

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            inflight.remove(key);
        }

        result
    }

    /// Number of keys with a run in flight
    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<T: Clone> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}
