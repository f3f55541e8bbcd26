//! Bounded cache that merges entries by identity

use std::collections::{HashMap, VecDeque};

use super::updates::NewUpdates;
use super::CacheItem;

/// FIFO buffer keyed by `(symbol, id)`.
///
/// Appending an entry whose identity is already cached overwrites it in place,
/// keeping the position of its first insertion. Identities are unique within
/// the buffer.
#[derive(Debug, Clone)]
pub struct ArrayCacheById<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Sequence number of `items[0]`
    head_seq: u64,
    index: HashMap<(String, String), u64>,
    updates: NewUpdates,
}

impl<T: CacheItem + Clone> ArrayCacheById<T> {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            head_seq: 0,
            index: HashMap::new(),
            updates: NewUpdates::new(true),
        }
    }

    pub fn append(&mut self, item: T) {
        self.updates.record(item.symbol(), item.id());

        let key = item.id().map(|id| (item.symbol().to_string(), id.to_string()));
        if let Some(key) = &key {
            if let Some(&seq) = self.index.get(key) {
                let position = (seq - self.head_seq) as usize;
                self.items[position] = item;
                return;
            }
        }

        let seq = self.head_seq + self.items.len() as u64;
        self.items.push_back(item);
        if let Some(key) = key {
            self.index.insert(key, seq);
        }

        while self.items.len() > self.capacity {
            if let Some(evicted) = self.items.pop_front() {
                if let Some(id) = evicted.id() {
                    self.index.remove(&(evicted.symbol().to_string(), id.to_string()));
                }
            }
            self.head_seq += 1;
        }
    }

    /// See [`NewUpdates::effective_limit`]
    pub fn effective_limit(
        &mut self,
        symbol: Option<&str>,
        requested: Option<usize>,
    ) -> Option<usize> {
        self.updates.effective_limit(symbol, requested)
    }

    pub fn get(&self, symbol: &str, id: &str) -> Option<&T> {
        let seq = self.index.get(&(symbol.to_string(), id.to_string()))?;
        self.items.get((seq - self.head_seq) as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
