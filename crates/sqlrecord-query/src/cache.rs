//! Per-connection cache of SELECT results.
//!
//! While enabled, a SELECT with the same SQL and bind values returns the
//! rows from its first execution instead of hitting the database. Any write
//! clears the whole cache, so reads never see data older than the last
//! statement that could have changed it.

use sqlrecord_core::{Row, Value};
use std::collections::HashMap;

/// A cached result set.
#[derive(Debug, Clone)]
struct CachedResult {
    rows: Vec<Row>,
    /// Tick of the last access, for LRU eviction.
    last_used: u64,
    hit_count: u64,
}

/// Hit/miss counters for a [`QueryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// LRU cache of query results keyed by SQL text and bind values.
///
/// When the cache exceeds `max_size`, the least-recently-used entry is
/// evicted.
///
/// # Example
///
/// ```
/// use sqlrecord_core::{Row, Value};
/// use sqlrecord_query::QueryCache;
///
/// let mut cache = QueryCache::new(16);
/// let sql = "SELECT * FROM posts WHERE id = ?1";
/// let params = [Value::BigInt(1)];
///
/// assert!(cache.get(sql, &params).is_none());
/// cache.insert(sql, &params, vec![Row::new(vec!["id".into()], vec![Value::BigInt(1)])]);
/// assert_eq!(cache.get(sql, &params).map(|rows| rows.len()), Some(1));
///
/// // A different bind is a different entry.
/// assert!(cache.get(sql, &[Value::BigInt(2)]).is_none());
/// ```
#[derive(Debug)]
pub struct QueryCache {
    cache: HashMap<String, CachedResult>,
    max_size: usize,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size: max_size.max(1),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn key(sql: &str, params: &[Value]) -> String {
        format!("{sql}\u{0}{params:?}")
    }

    /// Look up the rows cached for `sql` with `params`.
    pub fn get(&mut self, sql: &str, params: &[Value]) -> Option<Vec<Row>> {
        self.tick += 1;
        let tick = self.tick;
        match self.cache.get_mut(&Self::key(sql, params)) {
            Some(entry) => {
                entry.last_used = tick;
                entry.hit_count += 1;
                self.hits += 1;
                Some(entry.rows.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Cache `rows` for `sql` with `params`.
    pub fn insert(&mut self, sql: &str, params: &[Value], rows: Vec<Row>) {
        let key = Self::key(sql, params);
        if !self.cache.contains_key(&key) && self.cache.len() >= self.max_size {
            self.evict_lru();
        }
        self.tick += 1;
        self.cache.insert(
            key,
            CachedResult {
                rows,
                last_used: self.tick,
                hit_count: 0,
            },
        );
    }

    pub fn contains(&self, sql: &str, params: &[Value]) -> bool {
        self.cache.contains_key(&Self::key(sql, params))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached result.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.cache.len(),
        }
    }

    /// Evict the least-recently-used entry.
    fn evict_lru(&mut self) {
        let lru_key = self
            .cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru_key {
            self.cache.remove(&key);
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
