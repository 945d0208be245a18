//! A pooled database of connection handles.
//!
//! [`Database`] ties a [`DatabaseConfig`], a model [`Registry`] and a
//! [`Pool`] of [`ConnectionHandle`]s together.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlrecord::prelude::*;
//!
//! let db = Database::builder(DatabaseConfig::from_url("sqlite://app.db?pool=5")?)
//!     .model(ModelSchema::new("Post", "posts").column(ColumnDef::new("title", SqlType::Text)))
//!     .build()?;
//!
//! db.transaction(TransactionOptions::default(), |conn| {
//!     let schema = conn.model("Post")?;
//!     Record::create(conn, &schema, [("title", Value::from("Hello"))])?;
//!     Ok(())
//! })?;
//! ```

use crate::config::DatabaseConfig;
use sqlrecord_core::{Result, Value};
use sqlrecord_pool::{LeasedConnection, ManageConnection, Pool, PoolStat, PooledConnection};
use sqlrecord_session::{
    ConnectionHandle, HandleConfig, ModelSchema, Registry, SqlEvent, Subscriber,
    TransactionOptions,
};
use sqlrecord_sqlite::{SqliteConfig, SqliteConnection};
use std::fmt;
use std::sync::Arc;

/// Runs on every newly opened connection before it is handed out.
pub type ConnectHook = Arc<dyn Fn(&mut ConnectionHandle) -> Result<()> + Send + Sync>;

/// Opens SQLite connections wrapped in [`ConnectionHandle`]s.
pub struct HandleManager {
    sqlite: SqliteConfig,
    registry: Arc<Registry>,
    handle: HandleConfig,
    subscribers: Vec<Subscriber>,
    on_connect: Vec<ConnectHook>,
}

impl ManageConnection for HandleManager {
    type Connection = ConnectionHandle;

    fn connect(&self) -> Result<ConnectionHandle> {
        let conn = SqliteConnection::open(&self.sqlite)?;
        let mut handle =
            ConnectionHandle::new(conn, Arc::clone(&self.registry), self.handle.clone());
        for subscriber in &self.subscribers {
            let subscriber = Arc::clone(subscriber);
            handle.subscribe(move |event: &SqlEvent| subscriber(event));
        }
        for hook in &self.on_connect {
            hook(&mut handle)?;
        }
        tracing::debug!(database = %self.sqlite.path, "Opened connection");
        Ok(handle)
    }

    /// Roll back anything a previous user left open, then ping.
    fn is_valid(&self, conn: &mut ConnectionHandle) -> bool {
        if conn.transaction_open() {
            tracing::warn!(
                depth = conn.open_transactions(),
                "Connection returned with an open transaction; rolling back"
            );
            if let Err(e) = conn.rollback_all() {
                tracing::warn!(error = %e, "Rollback of abandoned transaction failed");
                return false;
            }
        }
        conn.clear_query_cache();
        conn.ping().is_ok()
    }
}

impl fmt::Debug for HandleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleManager")
            .field("sqlite", &self.sqlite)
            .field("handle", &self.handle)
            .field("subscribers", &self.subscribers.len())
            .field("on_connect", &self.on_connect.len())
            .finish_non_exhaustive()
    }
}

/// Configuration, models and a connection pool.
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    pool: Pool<HandleManager>,
}

impl Database {
    /// Start building a database for `config`.
    #[must_use]
    pub fn builder(config: DatabaseConfig) -> DatabaseBuilder {
        DatabaseBuilder::new(config)
    }

    /// Build from a URL such as `sqlite://app.db?pool=5`.
    pub fn open<I>(url: &str, models: I) -> Result<Self>
    where
        I: IntoIterator<Item = ModelSchema>,
    {
        DatabaseBuilder::new(DatabaseConfig::from_url(url)?)
            .models(models)
            .build()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.pool.manager().registry
    }

    /// Look up a registered model by name.
    pub fn model(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.registry().model(name)
    }

    pub fn pool(&self) -> &Pool<HandleManager> {
        &self.pool
    }

    /// Check out a connection for exclusive use; it returns to the pool
    /// when dropped.
    pub fn checkout(&self) -> Result<PooledConnection<HandleManager>> {
        self.pool.checkout()
    }

    /// The connection leased to the current thread.
    pub fn connection(&self) -> Result<LeasedConnection<HandleManager>> {
        self.pool.connection()
    }

    /// Give the current thread's lease back to the pool.
    pub fn release_connection(&self) -> bool {
        self.pool.release_connection()
    }

    /// Run `f` on the thread's leased connection, or on a temporary checkout.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut ConnectionHandle) -> Result<T>,
    ) -> Result<T> {
        self.pool.with_connection(f)
    }

    /// Run `f` in a transaction on a pooled connection.
    pub fn transaction<T, F>(&self, options: TransactionOptions, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<T>,
    {
        self.with_connection(|conn| conn.transaction(options, f))
    }

    /// Run a batch of statements (DDL, pragmas) on one connection.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// Run a read query on one connection.
    pub fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<sqlrecord_core::Row>> {
        self.with_connection(|conn| conn.select_uncached("SQL", sql, params))
    }

    pub fn stat(&self) -> PoolStat {
        self.pool.stat()
    }

    /// Reclaim leases held by exited threads.
    pub fn reap(&self) -> usize {
        self.pool.reap()
    }

    /// Close idle connections past their idle timeout.
    pub fn flush(&self) -> usize {
        self.pool.flush()
    }

    /// Close the pool. Later checkouts fail.
    pub fn disconnect(&self) {
        tracing::info!(database = %self.config.database, "Disconnecting database");
        self.pool.disconnect();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("models", &self.registry().len())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Builder for [`Database`].
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    registry: Registry,
    subscribers: Vec<Subscriber>,
    on_connect: Vec<ConnectHook>,
}

impl DatabaseBuilder {
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            subscribers: Vec::new(),
            on_connect: Vec::new(),
        }
    }

    /// Register a model.
    #[must_use]
    pub fn model(mut self, schema: ModelSchema) -> Self {
        self.registry.register(schema);
        self
    }

    #[must_use]
    pub fn models<I>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = ModelSchema>,
    {
        for schema in schemas {
            self.registry.register(schema);
        }
        self
    }

    /// Receive SQL events from every pooled connection.
    #[must_use]
    pub fn subscribe<F>(mut self, f: F) -> Self
    where
        F: Fn(&SqlEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(f));
        self
    }

    /// Run `f` on each new connection, e.g. to load a schema into an
    /// in-memory database.
    #[must_use]
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ConnectionHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.on_connect.push(Arc::new(f));
        self
    }

    /// Validate the config and models and create the pool. Connections
    /// open on first use.
    pub fn build(self) -> Result<Database> {
        self.config.validate()?;
        self.registry.validate()?;
        let manager = HandleManager {
            sqlite: self.config.sqlite_config(),
            registry: Arc::new(self.registry),
            handle: self.config.handle_config(),
            subscribers: self.subscribers,
            on_connect: self.on_connect,
        };
        let pool = Pool::new(manager, self.config.pool_config())?;
        tracing::debug!(
            database = %self.config.database,
            pool = self.config.pool,
            models = pool.manager().registry.len(),
            "Database ready"
        );
        Ok(Database {
            config: self.config,
            pool,
        })
    }
}

impl fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("config", &self.config)
            .field("models", &self.registry.len())
            .finish_non_exhaustive()
    }
}
