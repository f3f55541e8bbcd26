//! Bounded sequence caches
//!
//! Fixed-capacity FIFO buffers for trades, orders and fills. Oldest entries are
//! evicted once capacity is exceeded. Every cache also tracks how many entries
//! arrived since the last read so watchers can consume new data only.

mod array;
mod by_id;
mod updates;

pub use array::ArrayCache;
pub use by_id::ArrayCacheById;

use crate::parser::{Order, Trade};

/// An entry that can live in a bounded cache
pub trait CacheItem {
    fn symbol(&self) -> &str;

    /// Identity used by [`ArrayCacheById`]; entries without one are never merged
    fn id(&self) -> Option<&str>;

    /// Milliseconds since epoch
    fn timestamp(&self) -> i64;
}

impl CacheItem for Trade {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl CacheItem for Order {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Keep entries matching `symbol` with a timestamp at or after `since`, then the
/// last `limit` of those, preserving order.
pub fn filter_by_symbol_since_limit<'a, T, I>(
    items: I,
    symbol: Option<&str>,
    since: Option<i64>,
    limit: Option<usize>,
) -> Vec<T>
where
    T: CacheItem + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut matched: Vec<T> = items
        .into_iter()
        .filter(|item| symbol.map_or(true, |s| item.symbol() == s))
        .filter(|item| since.map_or(true, |t| item.timestamp() >= t))
        .cloned()
        .collect();

    if let Some(limit) = limit {
        if matched.len() > limit {
            matched.drain(..matched.len() - limit);
        }
    }
    matched
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::CacheItem;

    /// Minimal cache entry for exercising the caches in isolation
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Entry {
        pub symbol: String,
        pub id: String,
        pub status: &'static str,
        pub timestamp: i64,
    }

    pub fn entry(symbol: &str, id: &str, status: &'static str, timestamp: i64) -> Entry {
        Entry {
            symbol: symbol.to_string(),
            id: id.to_string(),
            status,
            timestamp,
        }
    }

    impl CacheItem for Entry {
        fn symbol(&self) -> &str {
            &self.symbol
        }

        fn id(&self) -> Option<&str> {
            Some(&self.id)
        }

        fn timestamp(&self) -> i64 {
            self.timestamp
        }
    }
}
