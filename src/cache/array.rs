//! Append-order bounded cache

use std::collections::VecDeque;

use super::updates::NewUpdates;
use super::CacheItem;

/// FIFO buffer that drops its oldest entry once `capacity` is exceeded
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    capacity: usize,
    updates: NewUpdates,
}

impl<T: CacheItem + Clone> ArrayCache<T> {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            updates: NewUpdates::new(false),
        }
    }

    pub fn append(&mut self, item: T) {
        self.updates.record(item.symbol(), item.id());
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
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

#[cfg(test)]
mod tests {
    use super::super::test_support::entry;
    use super::*;

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let mut cache = ArrayCache::new(2);
        for id in ["1", "2", "3"] {
            cache.append(entry("BTC-PERP", id, "new", 0));
        }
        let ids: Vec<_> = cache.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, ["2", "3"]);
    }

    #[test]
    fn test_keeps_last_n_in_append_order() {
        let mut cache = ArrayCache::new(5);
        for i in 0..12 {
            cache.append(entry("BTC-PERP", &i.to_string(), "new", i));
        }
        assert_eq!(cache.len(), 5);
        let timestamps: Vec<_> = cache.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, [7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_duplicates_are_appended() {
        let mut cache = ArrayCache::new(10);
        cache.append(entry("BTC-PERP", "1", "new", 0));
        cache.append(entry("BTC-PERP", "1", "new", 0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = ArrayCache::new(0);
        cache.append(entry("BTC-PERP", "1", "new", 0));
        cache.append(entry("BTC-PERP", "2", "new", 0));
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.to_vec()[0].id, "2");
    }
}
