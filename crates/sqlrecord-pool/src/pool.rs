//! The blocking, fair connection pool.
//!
//! State lives behind one `Mutex` with a `Condvar` for waiters. Callers that
//! find the pool exhausted take a ticket and join a FIFO queue. A returning
//! connection is not parked when someone is queued: it is handed directly to
//! the ticket at the front, so a thread that arrives later can never jump
//! ahead by grabbing it first. Freed capacity (a discarded or failed
//! connection) is handed off the same way.
//!
//! Per-thread leases are tracked separately from checkout state. Each lease
//! remembers a weak reference to a token stored in the owning thread's
//! thread-local storage; once the thread exits the token is gone and the
//! reaper returns the connection.

use crate::config::PoolConfig;
use sqlrecord_core::{Error, PoolErrorKind, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Opens and checks connections for a [`Pool`].
pub trait ManageConnection: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection>;

    /// Check that an idle connection is still usable before reuse.
    ///
    /// Implementations may also reset per-session state here.
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

thread_local! {
    static THREAD_TOKEN: Arc<()> = Arc::new(());
}

/// A weak handle that dies with the current thread.
fn thread_token() -> Weak<()> {
    THREAD_TOKEN.with(Arc::downgrade)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed_error() -> Error {
    Error::pool(PoolErrorKind::Closed, "connection pool has been disconnected")
}

fn timeout_error(timeout: Duration) -> Error {
    Error::pool(
        PoolErrorKind::Timeout,
        format!(
            "could not obtain a connection from the pool within {:.3} seconds; all pooled connections were in use",
            timeout.as_secs_f64()
        ),
    )
}

struct IdleConnection<C> {
    conn: C,
    idle_since: Instant,
}

/// What a waiter receives when it reaches the front of the queue.
enum Handoff<C> {
    /// A connection returned by another thread.
    Connection(C),
    /// Room to open a new connection.
    Capacity,
}

struct PoolState<C> {
    idle: Vec<IdleConnection<C>>,
    /// Open connections plus reserved slots for ones being opened.
    total: usize,
    busy: usize,
    waiters: VecDeque<u64>,
    handoffs: HashMap<u64, Handoff<C>>,
    next_ticket: u64,
    closed: bool,
}

impl<C> PoolState<C> {
    /// Give a connection to the longest waiter, or park it. Returns whether
    /// waiters must be woken.
    fn dispatch(&mut self, conn: C) -> bool {
        match self.waiters.pop_front() {
            Some(ticket) => {
                self.handoffs.insert(ticket, Handoff::Connection(conn));
                true
            }
            None => {
                self.idle.push(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                false
            }
        }
    }

    /// A slot's connection is gone; let the longest waiter open a new one
    /// or shrink the pool.
    fn release_capacity(&mut self) -> bool {
        if !self.closed {
            if let Some(ticket) = self.waiters.pop_front() {
                self.handoffs.insert(ticket, Handoff::Capacity);
                return true;
            }
        }
        self.total -= 1;
        false
    }
}

struct LeaseEntry<M: ManageConnection> {
    conn: LeasedConnection<M>,
    owner: Weak<()>,
}

struct SharedPool<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    cond: Condvar,
    leases: Mutex<HashMap<ThreadId, LeaseEntry<M>>>,
}

impl<M: ManageConnection> SharedPool<M> {
    fn acquire(&self) -> Result<M::Connection> {
        let deadline = Instant::now() + self.config.checkout_timeout;
        let handoff = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(closed_error());
            }
            // Anyone already queued goes first, even if a connection is idle.
            if state.waiters.is_empty() {
                if let Some(idle) = state.idle.pop() {
                    state.busy += 1;
                    Handoff::Connection(idle.conn)
                } else if state.total < self.config.size {
                    state.total += 1;
                    state.busy += 1;
                    Handoff::Capacity
                } else {
                    self.wait_for_handoff(state, deadline)?
                }
            } else {
                self.wait_for_handoff(state, deadline)?
            }
        };

        match handoff {
            Handoff::Connection(conn) => self.validate(conn),
            Handoff::Capacity => self.open(),
        }
    }

    fn wait_for_handoff(
        &self,
        mut state: MutexGuard<'_, PoolState<M::Connection>>,
        deadline: Instant,
    ) -> Result<Handoff<M::Connection>> {
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);
        trace!(ticket, waiting = state.waiters.len(), "waiting for a pooled connection");

        loop {
            if state.closed {
                state.waiters.retain(|t| *t != ticket);
                let stale = state.handoffs.remove(&ticket);
                if stale.is_some() {
                    state.total -= 1;
                }
                drop(state);
                drop(stale);
                return Err(closed_error());
            }

            // A hand-off is honored even if it landed right at the deadline;
            // once the ticket leaves the queue nothing more can be sent to it.
            if let Some(handoff) = state.handoffs.remove(&ticket) {
                state.busy += 1;
                trace!(ticket, "received pooled connection hand-off");
                return Ok(handoff);
            }

            let now = Instant::now();
            if now >= deadline {
                state.waiters.retain(|t| *t != ticket);
                debug!(ticket, "timed out waiting for a pooled connection");
                return Err(timeout_error(self.config.checkout_timeout));
            }

            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn open(&self) -> Result<M::Connection> {
        match self.manager.connect() {
            Ok(conn) => {
                debug!(size = self.config.size, "opened pooled connection");
                Ok(conn)
            }
            Err(e) => {
                warn!(error = %e, "failed to open pooled connection");
                self.forfeit();
                Err(e)
            }
        }
    }

    fn validate(&self, mut conn: M::Connection) -> Result<M::Connection> {
        if !self.config.test_on_checkout || self.manager.is_valid(&mut conn) {
            return Ok(conn);
        }
        warn!("discarding broken pooled connection");
        drop(conn);
        self.open()
    }

    /// Give up a checked-out slot that no longer has a connection.
    fn forfeit(&self) {
        let mut state = lock(&self.state);
        state.busy -= 1;
        if state.release_capacity() {
            self.cond.notify_all();
        }
    }

    fn checkin(&self, conn: M::Connection, broken: bool) {
        let discarded = {
            let mut state = lock(&self.state);
            state.busy -= 1;
            if state.closed || broken {
                if state.release_capacity() {
                    self.cond.notify_all();
                }
                Some(conn)
            } else {
                if state.dispatch(conn) {
                    self.cond.notify_all();
                }
                None
            }
        };
        if discarded.is_some() {
            trace!(broken, "discarded returned connection");
        }
    }

    fn reap(&self) -> usize {
        let dead: Vec<LeaseEntry<M>> = {
            let mut leases = lock(&self.leases);
            let ids: Vec<ThreadId> = leases
                .iter()
                .filter(|(_, entry)| entry.owner.strong_count() == 0)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| leases.remove(id)).collect()
        };
        let count = dead.len();
        if count > 0 {
            warn!(count, "reclaiming connections leased by exited threads");
        }
        // Dropping the entries returns their connections.
        drop(dead);
        count
    }

    fn flush(&self) -> usize {
        let Some(max_idle) = self.config.idle_timeout else {
            return 0;
        };
        let expired: Vec<IdleConnection<M::Connection>> = {
            let mut state = lock(&self.state);
            let (keep, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|c| c.idle_since.elapsed() < max_idle);
            state.idle = keep;
            state.total -= expired.len();
            expired
        };
        if !expired.is_empty() {
            debug!(count = expired.len(), "flushed idle connections");
        }
        expired.len()
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStat {
    /// Configured maximum.
    pub size: usize,
    /// Open connections (including ones being opened or handed off).
    pub connections: usize,
    /// Connections checked out.
    pub busy: usize,
    pub idle: usize,
    /// Leases held by threads that have exited.
    pub dead: usize,
    /// Threads queued for a connection.
    pub waiting: usize,
    pub checkout_timeout: Duration,
}

/// A fixed-size pool of connections opened by `M`.
///
/// Cloning a `Pool` is cheap and shares the same connections.
///
/// # Example
///
/// ```
/// use sqlrecord_core::Result;
/// use sqlrecord_pool::{ManageConnection, Pool, PoolConfig};
///
/// struct Numbers;
///
/// impl ManageConnection for Numbers {
///     type Connection = u32;
///     fn connect(&self) -> Result<u32> {
///         Ok(7)
///     }
///     fn is_valid(&self, _conn: &mut u32) -> bool {
///         true
///     }
/// }
///
/// let pool = Pool::new(Numbers, PoolConfig::new(2).reaping_frequency(None)).unwrap();
/// {
///     let conn = pool.checkout().unwrap();
///     assert_eq!(*conn, 7);
///     assert_eq!(pool.stat().busy, 1);
/// }
/// assert_eq!(pool.stat().idle, 1);
/// ```
pub struct Pool<M: ManageConnection> {
    shared: Arc<SharedPool<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create a pool. Connections are opened lazily.
    ///
    /// Starts the background reaper when `config.reaping_frequency` is set;
    /// the reaper only holds a weak reference and stops once every `Pool`
    /// handle is dropped.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let frequency = config.reaping_frequency;
        let shared = Arc::new(SharedPool {
            manager,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                busy: 0,
                waiters: VecDeque::new(),
                handoffs: HashMap::new(),
                next_ticket: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            leases: Mutex::new(HashMap::new()),
        });
        if let Some(frequency) = frequency {
            spawn_reaper(Arc::downgrade(&shared), frequency);
        }
        Ok(Self { shared })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Check out a connection, blocking until one is free.
    ///
    /// Fails with [`PoolErrorKind::Timeout`] after `checkout_timeout`.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn checkout(&self) -> Result<PooledConnection<M>> {
        let conn = self.shared.acquire()?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.shared),
            broken: false,
        })
    }

    /// The connection leased to the current thread, checking one out on
    /// first use.
    pub fn connection(&self) -> Result<LeasedConnection<M>> {
        let id = thread::current().id();
        if let Some(entry) = lock(&self.shared.leases).get(&id) {
            return Ok(entry.conn.clone());
        }
        let pooled = self.checkout()?;
        let leased = LeasedConnection {
            inner: Arc::new(Mutex::new(pooled)),
        };
        lock(&self.shared.leases).insert(
            id,
            LeaseEntry {
                conn: leased.clone(),
                owner: thread_token(),
            },
        );
        trace!(thread = ?id, "leased connection to thread");
        Ok(leased)
    }

    /// Return the current thread's lease. The connection goes back to the
    /// pool once every [`LeasedConnection`] handle is dropped.
    pub fn release_connection(&self) -> bool {
        let entry = lock(&self.shared.leases).remove(&thread::current().id());
        entry.is_some()
    }

    /// Whether the current thread holds a lease.
    pub fn active_connection(&self) -> bool {
        lock(&self.shared.leases).contains_key(&thread::current().id())
    }

    /// Run `f` on the thread's leased connection, or on a connection checked
    /// out for the duration of the call.
    ///
    /// `f` must not call back into `with_connection` on the same pool while
    /// the thread holds a lease.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut M::Connection) -> Result<T>,
    ) -> Result<T> {
        let leased = lock(&self.shared.leases)
            .get(&thread::current().id())
            .map(|entry| entry.conn.clone());
        match leased {
            Some(leased) => {
                let mut guard = leased.lock();
                f(&mut **guard)
            }
            None => {
                let mut pooled = self.checkout()?;
                f(&mut *pooled)
            }
        }
    }

    /// Return connections leased by threads that have exited.
    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    /// Drop idle connections unused for longer than `idle_timeout`.
    pub fn flush(&self) -> usize {
        self.shared.flush()
    }

    pub fn stat(&self) -> PoolStat {
        let dead = lock(&self.shared.leases)
            .values()
            .filter(|entry| entry.owner.strong_count() == 0)
            .count();
        let state = lock(&self.shared.state);
        PoolStat {
            size: self.shared.config.size,
            connections: state.total,
            busy: state.busy,
            idle: state.idle.len(),
            dead,
            waiting: state.waiters.len(),
            checkout_timeout: self.shared.config.checkout_timeout,
        }
    }

    /// Close idle connections and release every lease. Connections still
    /// checked out are discarded when returned, and further checkouts fail
    /// with [`PoolErrorKind::Closed`].
    pub fn disconnect(&self) {
        let leases: Vec<LeaseEntry<M>> = lock(&self.shared.leases)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let idle = {
            let mut state = lock(&self.shared.state);
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.total -= idle.len();
            self.shared.cond.notify_all();
            idle
        };
        debug!(idle = idle.len(), leases = leases.len(), "pool disconnected");
        drop(idle);
        drop(leases);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stat", &self.stat())
            .finish()
    }
}

fn spawn_reaper<M: ManageConnection>(pool: Weak<SharedPool<M>>, frequency: Duration) {
    let spawned = thread::Builder::new()
        .name("sqlrecord-pool-reaper".to_string())
        .spawn(move || {
            loop {
                thread::sleep(frequency);
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                let reaped = pool.reap();
                let flushed = pool.flush();
                trace!(reaped, flushed, "reaper pass");
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start connection reaper");
    }
}

/// A connection checked out of a [`Pool`]; returned when dropped.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    pool: Arc<SharedPool<M>>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Discard this connection instead of reusing it when it is returned.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn, self.broken);
        }
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

/// A connection leased to one thread by [`Pool::connection`].
///
/// Clones share the same connection.
pub struct LeasedConnection<M: ManageConnection> {
    inner: Arc<Mutex<PooledConnection<M>>>,
}

impl<M: ManageConnection> LeasedConnection<M> {
    /// Lock the leased connection for use.
    pub fn lock(&self) -> MutexGuard<'_, PooledConnection<M>> {
        lock(&self.inner)
    }

    /// Whether two handles refer to the same lease.
    pub fn same_lease(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M: ManageConnection> Clone for LeasedConnection<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for LeasedConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasedConnection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestManager {
        opened: AtomicUsize,
        broken: AtomicBool,
        fail: AtomicBool,
    }

    #[derive(Debug)]
    struct TestConn {
        id: usize,
    }

    impl ManageConnection for TestManager {
        type Connection = TestConn;

        fn connect(&self) -> Result<TestConn> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Custom("connect refused".to_string()));
            }
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(TestConn { id })
        }

        fn is_valid(&self, _conn: &mut TestConn) -> bool {
            !self.broken.load(Ordering::SeqCst)
        }
    }

    fn config(size: usize) -> PoolConfig {
        PoolConfig::new(size)
            .checkout_timeout(Duration::from_secs(5))
            .reaping_frequency(None)
    }

    fn pool(size: usize) -> Pool<TestManager> {
        Pool::new(TestManager::default(), config(size)).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn is_kind(err: &Error, kind: PoolErrorKind) -> bool {
        matches!(err, Error::Pool(e) if e.kind == kind)
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let err = Pool::new(TestManager::default(), config(0)).unwrap_err();
        assert!(is_kind(&err, PoolErrorKind::Config));
    }

    #[test]
    fn test_connections_open_lazily_and_are_reused() {
        let pool = pool(3);
        assert_eq!(pool.stat().connections, 0);

        let first = pool.checkout().unwrap().id;
        let second = pool.checkout().unwrap().id;
        assert_eq!(first, second);

        let stat = pool.stat();
        assert_eq!(stat.connections, 1);
        assert_eq!(stat.idle, 1);
        assert_eq!(stat.busy, 0);
    }

    #[test]
    fn test_never_exceeds_size() {
        let pool = Pool::new(
            TestManager::default(),
            config(2).checkout_timeout(Duration::from_millis(30)),
        )
        .unwrap();
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_ne!(a.id, b.id);

        let err = pool.checkout().unwrap_err();
        assert!(is_kind(&err, PoolErrorKind::Timeout));
        assert_eq!(pool.stat().connections, 2);
        assert_eq!(pool.stat().waiting, 0);
    }

    #[test]
    fn test_waiters_are_served_in_arrival_order() {
        let pool = pool(1);
        let held = pool.checkout().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let worker_pool = pool.clone();
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let conn = worker_pool.checkout().unwrap();
                order.lock().unwrap().push(i);
                drop(conn);
            }));
            wait_until(|| pool.stat().waiting == i + 1);
        }

        drop(held);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(pool.stat().connections, 1);
    }

    #[test]
    fn test_returned_connection_is_handed_to_waiter() {
        let pool = pool(1);
        let held = pool.checkout().unwrap();
        let held_id = held.id;

        let waiter_pool = pool.clone();
        let waiter = thread::spawn(move || waiter_pool.checkout().map(|c| c.id));
        wait_until(|| pool.stat().waiting == 1);

        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        assert_eq!(pool.stat().waiting, 0);
        assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_lease_is_reused_on_same_thread() {
        let pool = pool(2);
        assert!(!pool.active_connection());

        let a = pool.connection().unwrap();
        let b = pool.connection().unwrap();
        assert!(a.same_lease(&b));
        assert!(pool.active_connection());

        let other_pool = pool.clone();
        let mine = a.lock().id;
        let theirs = thread::spawn(move || {
            let id = other_pool.connection().unwrap().lock().id;
            other_pool.release_connection();
            id
        })
        .join()
        .unwrap();
        assert_ne!(mine, theirs);

        drop(a);
        drop(b);
        assert!(pool.release_connection());
        assert!(!pool.release_connection());
        assert_eq!(pool.stat().busy, 0);
    }

    #[test]
    fn test_with_connection_prefers_lease() {
        let pool = pool(2);

        let id = pool.with_connection(|c| Ok(c.id)).unwrap();
        assert_eq!(pool.stat().busy, 0);

        let lease = pool.connection().unwrap();
        let leased_id = lease.lock().id;
        let seen = pool.with_connection(|c| Ok(c.id)).unwrap();
        assert_eq!(seen, leased_id);
        assert_eq!(leased_id, id);
        assert_eq!(pool.stat().busy, 1);
    }

    #[test]
    fn test_reap_reclaims_dead_thread_lease() {
        let pool = Pool::new(
            TestManager::default(),
            config(1).checkout_timeout(Duration::from_millis(30)),
        )
        .unwrap();

        let thread_pool = pool.clone();
        thread::spawn(move || {
            let _conn = thread_pool.connection().unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(pool.stat().dead, 1);
        assert!(pool.checkout().is_err());

        assert_eq!(pool.reap(), 1);
        assert_eq!(pool.stat().dead, 0);
        assert_eq!(pool.stat().busy, 0);
        assert!(pool.checkout().is_ok());
        assert_eq!(pool.reap(), 0);
    }

    #[test]
    fn test_background_reaper() {
        let pool = Pool::new(
            TestManager::default(),
            config(1).reaping_frequency(Some(Duration::from_millis(5))),
        )
        .unwrap();

        let thread_pool = pool.clone();
        thread::spawn(move || {
            thread_pool.connection().map(|_| ()).unwrap();
        })
        .join()
        .unwrap();

        wait_until(|| pool.stat().busy == 0);
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn test_broken_connection_is_replaced() {
        let pool = pool(1);
        let first = pool.checkout().unwrap().id;

        pool.manager().broken.store(true, Ordering::SeqCst);
        let second = pool.checkout().unwrap().id;
        assert_ne!(first, second);
        assert_eq!(pool.stat().connections, 1);
        assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_marked_broken_is_discarded_on_return() {
        let pool = pool(1);
        let mut conn = pool.checkout().unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.stat().connections, 0);
        assert_ne!(pool.checkout().unwrap().id, 0);
    }

    #[test]
    fn test_connect_failure_frees_capacity() {
        let pool = pool(1);
        pool.manager().fail.store(true, Ordering::SeqCst);
        assert!(pool.checkout().is_err());
        assert_eq!(pool.stat().connections, 0);
        assert_eq!(pool.stat().busy, 0);

        pool.manager().fail.store(false, Ordering::SeqCst);
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn test_flush_drops_expired_idle_connections() {
        let pool = Pool::new(
            TestManager::default(),
            config(2).idle_timeout(Some(Duration::ZERO)),
        )
        .unwrap();
        drop(pool.checkout().unwrap());
        assert_eq!(pool.stat().idle, 1);

        assert_eq!(pool.flush(), 1);
        assert_eq!(pool.stat().idle, 0);
        assert_eq!(pool.stat().connections, 0);
    }

    #[test]
    fn test_flush_keeps_recent_connections() {
        let pool = Pool::new(
            TestManager::default(),
            config(2).idle_timeout(Some(Duration::from_secs(600))),
        )
        .unwrap();
        drop(pool.checkout().unwrap());
        assert_eq!(pool.flush(), 0);
        assert_eq!(pool.stat().idle, 1);
    }

    #[test]
    fn test_disconnect() {
        let pool = pool(2);
        let held = pool.checkout().unwrap();
        drop(pool.checkout().unwrap());
        assert_eq!(pool.stat().connections, 2);

        pool.disconnect();
        assert!(pool.is_closed());
        assert_eq!(pool.stat().connections, 1);
        let err = pool.checkout().unwrap_err();
        assert!(is_kind(&err, PoolErrorKind::Closed));

        drop(held);
        assert_eq!(pool.stat().connections, 0);
        assert_eq!(pool.stat().idle, 0);
    }

    #[test]
    fn test_disconnect_wakes_waiters() {
        let pool = pool(1);
        let _held = pool.checkout().unwrap();
        let waiter_pool = pool.clone();
        let waiter = thread::spawn(move || waiter_pool.checkout().map(|_| ()));
        wait_until(|| pool.stat().waiting == 1);

        pool.disconnect();
        let err = waiter.join().unwrap().unwrap_err();
        assert!(is_kind(&err, PoolErrorKind::Closed));
    }
}
