//! Hydration cache
//!
//! One instance per query execution. Guarantees at most one in-flight
//! compute per key; successful results are shared with every later caller.
//! A failure goes back to the caller that ran the compute and is never
//! stored: the next waiter (or the next request) computes again.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Value>>;

#[derive(Default)]
pub struct HydrateCache {
    slots: Mutex<HashMap<String, Slot>>,
    computes: AtomicUsize,
    hits: AtomicUsize,
}

impl HydrateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Return the cached value for `key`, running `compute` if no value is
    /// ready. Concurrent callers wait on the single in-flight compute.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let slot = self.slot(key);

        if let Some(value) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }

        let mut ran = false;
        let value = slot
            .get_or_try_init(|| {
                ran = true;
                self.computes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("hydrate cache miss: {}", key);
                compute()
            })
            .await?;

        if !ran {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value.clone())
    }

    /// Number of computes started
    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::Relaxed)
    }

    /// Number of requests served without computing
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
