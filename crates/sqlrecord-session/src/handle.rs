//! Connection handles.
//!
//! A [`ConnectionHandle`] wraps one driver connection with everything the
//! record layer keeps per connection: the transaction stack, the query
//! cache, SQL event subscribers and the model registry. Pools hand out
//! handles, not raw driver connections.

use crate::n1_detection::N1QueryTracker;
use crate::schema::{ModelSchema, Registry};
use crate::transaction::TransactionFrame;
use sqlrecord_core::{Connection, Dialect, Result, Row, Value};
use sqlrecord_query::{CacheStats, QueryCache};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Event name for transaction control statements.
pub const TRANSACTION_EVENT: &str = "TRANSACTION";
/// Event name for raw DDL and batch statements.
pub const SCHEMA_EVENT: &str = "SCHEMA";

/// Per-handle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleConfig {
    /// Cache SELECT results until the next write.
    pub query_cache: bool,
    pub query_cache_size: usize,
    /// Batch-load associations for records loaded together.
    pub dynamic_includes: bool,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            query_cache: true,
            query_cache_size: 1024,
            dynamic_includes: true,
        }
    }
}

impl HandleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query_cache(mut self, enabled: bool) -> Self {
        self.query_cache = enabled;
        self
    }

    #[must_use]
    pub fn query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    #[must_use]
    pub fn dynamic_includes(mut self, enabled: bool) -> Self {
        self.dynamic_includes = enabled;
        self
    }
}

/// One executed (or cache-served) statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlEvent {
    /// `"Post Load"`, `"Post Update"`, [`TRANSACTION_EVENT`], ...
    pub name: String,
    pub sql: String,
    pub binds: Vec<Value>,
    /// Served from the query cache without touching the database.
    pub cached: bool,
    pub duration: Duration,
}

/// A callback receiving every [`SqlEvent`] on a handle.
pub type Subscriber = Arc<dyn Fn(&SqlEvent) + Send + Sync>;

/// Collects SQL events so tests can count the queries an operation ran.
///
/// ```
/// use sqlrecord_session::QueryCounter;
///
/// let counter = QueryCounter::new();
/// assert_eq!(counter.count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryCounter {
    events: Arc<Mutex<Vec<SqlEvent>>>,
}

impl QueryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber recording into this counter.
    pub fn subscriber(&self) -> Subscriber {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &SqlEvent| {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        })
    }

    fn events(&self) -> Vec<SqlEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Statements that reached the database, excluding transaction control
    /// and schema statements.
    pub fn count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| !e.cached && e.name != TRANSACTION_EVENT && e.name != SCHEMA_EVENT)
            .count()
    }

    pub fn cached_count(&self) -> usize {
        self.events().iter().filter(|e| e.cached).count()
    }

    /// SQL of every recorded event, in order.
    pub fn statements(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.sql).collect()
    }

    /// SQL of recorded events named `name`.
    pub fn statements_named(&self, name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .map(|e| e.sql)
            .collect()
    }

    pub fn reset(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A driver connection plus per-connection record state.
pub struct ConnectionHandle {
    conn: Box<dyn Connection>,
    registry: Arc<Registry>,
    config: HandleConfig,
    pub(crate) transactions: Vec<TransactionFrame>,
    query_cache: QueryCache,
    cache_enabled: bool,
    subscribers: Vec<Subscriber>,
    n1: N1QueryTracker,
}

impl ConnectionHandle {
    pub fn new<C>(conn: C, registry: Arc<Registry>, config: HandleConfig) -> Self
    where
        C: Connection + 'static,
    {
        Self::from_boxed(Box::new(conn), registry, config)
    }

    pub fn from_boxed(
        conn: Box<dyn Connection>,
        registry: Arc<Registry>,
        config: HandleConfig,
    ) -> Self {
        Self {
            conn,
            registry,
            query_cache: QueryCache::new(config.query_cache_size),
            cache_enabled: config.query_cache,
            config,
            transactions: Vec::new(),
            subscribers: Vec::new(),
            n1: N1QueryTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Look up a registered model by name.
    pub fn model(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.registry.model(name)
    }

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn adapter_name(&self) -> &'static str {
        self.conn.adapter_name()
    }

    /// Toggle dynamic includes for this handle.
    pub fn set_dynamic_includes(&mut self, enabled: bool) {
        self.config.dynamic_includes = enabled;
    }

    pub fn dynamic_includes(&self) -> bool {
        self.config.dynamic_includes
    }

    pub fn n1_tracker(&self) -> &N1QueryTracker {
        &self.n1
    }

    pub fn n1_tracker_mut(&mut self) -> &mut N1QueryTracker {
        &mut self.n1
    }

    /// Round-trip to the database.
    pub fn ping(&mut self) -> Result<()> {
        self.conn.ping()
    }

    // ==================== Events ====================

    /// Receive every SQL event on this handle.
    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&SqlEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(f));
    }

    pub fn subscribe_counter(&mut self, counter: &QueryCounter) {
        self.subscribers.push(counter.subscriber());
    }

    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    fn emit(&self, name: &str, sql: &str, binds: &[Value], cached: bool, duration: Duration) {
        tracing::debug!(
            name = name,
            sql = sql,
            binds = ?binds,
            cached = cached,
            elapsed_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            "SQL"
        );
        if self.subscribers.is_empty() {
            return;
        }
        let event = SqlEvent {
            name: name.to_string(),
            sql: sql.to_string(),
            binds: binds.to_vec(),
            cached,
            duration,
        };
        for subscriber in &self.subscribers {
            subscriber(&event);
        }
    }

    // ==================== Query Cache ====================

    pub fn enable_query_cache(&mut self) {
        self.cache_enabled = true;
    }

    /// Stop caching and drop everything cached.
    pub fn disable_query_cache(&mut self) {
        self.cache_enabled = false;
        self.query_cache.clear();
    }

    pub fn clear_query_cache(&mut self) {
        if !self.query_cache.is_empty() {
            tracing::trace!(entries = self.query_cache.len(), "Clearing query cache");
        }
        self.query_cache.clear();
    }

    pub fn query_cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn query_cache_stats(&self) -> CacheStats {
        self.query_cache.stats()
    }

    // ==================== Execution ====================

    /// Run a SELECT, serving it from the query cache when possible.
    pub fn select_all(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if self.cache_enabled {
            let start = Instant::now();
            if let Some(rows) = self.query_cache.get(sql, params) {
                self.emit(name, sql, params, true, start.elapsed());
                return Ok(rows);
            }
        }
        let rows = self.select_uncached(name, sql, params)?;
        if self.cache_enabled {
            self.query_cache.insert(sql, params, rows.clone());
        }
        Ok(rows)
    }

    /// Run a SELECT against the database, bypassing the cache.
    pub fn select_uncached(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let start = Instant::now();
        let rows = self.conn.query(sql, params);
        self.emit(name, sql, params, false, start.elapsed());
        rows
    }

    /// Run an UPDATE or DELETE, returning affected rows.
    pub fn exec_update(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<u64> {
        self.clear_query_cache();
        let start = Instant::now();
        let affected = self.conn.execute(sql, params);
        self.emit(name, sql, params, false, start.elapsed());
        affected
    }

    /// Run an INSERT, returning the new row id.
    pub fn exec_insert(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<i64> {
        self.clear_query_cache();
        let start = Instant::now();
        let id = self.conn.insert(sql, params);
        self.emit(name, sql, params, false, start.elapsed());
        id
    }

    /// Run one or more statements without binds, e.g. DDL.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.clear_query_cache();
        let start = Instant::now();
        let result = self.conn.execute_batch(sql);
        self.emit(SCHEMA_EVENT, sql, &[], false, start.elapsed());
        result
    }

    /// Run a transaction control statement and report it as `label`.
    pub(crate) fn transaction_statement<F>(&mut self, label: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Connection) -> Result<()>,
    {
        let start = Instant::now();
        let result = f(self.conn.as_mut());
        self.emit(TRANSACTION_EVENT, label, &[], false, start.elapsed());
        result
    }

    pub(crate) fn supports_savepoints(&self) -> bool {
        self.conn.supports_savepoints()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("adapter", &self.conn.adapter_name())
            .field("config", &self.config)
            .field("open_transactions", &self.transactions.len())
            .field("query_cache", &self.query_cache.stats())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
