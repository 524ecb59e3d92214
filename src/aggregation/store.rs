//! Bucket store
//!
//! Buckets live in a `Vec` in creation order, indexed by key. Flush walks the
//! vector, so output order is deterministic for a given input order.

use std::collections::HashMap;

use super::kernel::State;
use super::key::AggregationKey;

/// One group: its key and one accumulator per kernel
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    pub(crate) key: AggregationKey,
    pub(crate) states: Vec<State>,
}

#[derive(Debug, Default)]
pub(crate) struct BucketStore {
    buckets: Vec<Bucket>,
    index: HashMap<AggregationKey, usize>,
}

impl BucketStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bucket for `key`, created with `init` if missing
    ///
    /// The flag is true when the bucket was created by this call.
    pub(crate) fn get_or_insert<F>(&mut self, key: AggregationKey, init: F) -> (&mut Bucket, bool)
    where
        F: FnOnce() -> Vec<State>,
    {
        if let Some(&idx) = self.index.get(&key) {
            return (&mut self.buckets[idx], false);
        }

        let idx = self.buckets.len();
        self.index.insert(key.clone(), idx);
        self.buckets.push(Bucket { key, states: init() });
        (&mut self.buckets[idx], true)
    }

    pub(crate) fn get(&self, key: &AggregationKey) -> Option<&Bucket> {
        self.index.get(key).map(|&idx| &self.buckets[idx])
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Bucket> {
        self.buckets.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }
}
