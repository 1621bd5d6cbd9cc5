//! The bounded per-address connection pool (C6, §4.6).
//!
//! Bookkeeping lives behind a single async mutex; critical sections never perform I/O
//! themselves (§5) — connection creation and liveness probes happen outside the lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify};

use crate::config::{Address, DriverConfig};
use crate::error::{Error, Result};

/// Anything this pool can hold: a live Bolt connection plus the bookkeeping the pool needs
/// (age, idle time, liveness probing). The connection layer implements this trait so the
/// pool stays decoupled from `BoltConnection`'s concrete type.
#[async_trait::async_trait]
pub trait PooledConnection: Send {
    fn created_at(&self) -> Instant;
    fn is_broken(&self) -> bool;
    /// Send `RESET` and await its response, used as a liveness probe (§4.6 step 2).
    async fn probe(&mut self) -> Result<()>;
    /// Run any deferred cleanup before this connection goes back to `idle` — e.g. issuing
    /// the `DISCARD` a dropped, unexhausted cursor flagged but couldn't send itself (§4.5
    /// step 5). Default is a no-op for connections with nothing to reclaim.
    async fn reclaim(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Idle<C> {
    conn: C,
    became_idle_at: Instant,
}

struct PoolState<C> {
    idle: VecDeque<Idle<C>>,
    in_use: usize,
    waiters: usize,
    terminating: bool,
}

/// A bounded pool of connections to one address (§4.6). One instance is created per
/// `(address, database)` pair that the driver has routed work to.
pub struct ConnectionPool<C> {
    address: Address,
    config: DriverConfig,
    state: Mutex<PoolState<C>>,
    waiter_woken: Notify,
    /// Captured at construction so `PoolGuard::drop` can hand `release` to the runtime even
    /// when the guard is dropped on a plain thread with no ambient Tokio context (§4.6,
    /// the blocking facade's returned guard).
    handle: Handle,
}

impl<C: PooledConnection + 'static> ConnectionPool<C> {
    /// Must be called from within a Tokio runtime (or a thread that has `Handle::enter`ed
    /// one), since it captures `Handle::current()` for `PoolGuard`'s release-on-drop.
    pub fn new(address: Address, config: DriverConfig) -> Self {
        Self {
            address,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                in_use: 0,
                waiters: 0,
                terminating: false,
            }),
            waiter_woken: Notify::new(),
            handle: Handle::current(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Acquire a connection, creating one if the pool has room, otherwise waiting up to
    /// `AcquisitionTimeout` (§4.6 step 4).
    ///
    /// `connect` is called outside any lock whenever a fresh connection is needed. The pool
    /// is held by `Arc` so the returned guard can release asynchronously on drop without
    /// borrowing the pool for the guard's lifetime.
    pub async fn acquire<F, Fut>(self: &Arc<Self>, connect: F) -> Result<PoolGuard<C>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<C>>,
    {
        let deadline = Instant::now() + self.config.acquisition_timeout;
        // Registered at most once per call: `try_acquire_once` no longer touches the
        // waiter count itself, so a task that loops on spurious wakeups doesn't inflate
        // `waiters_len` past the single slot it actually occupies (§8 pool invariants).
        let mut registered = false;
        let outcome = loop {
            match self.try_acquire_once().await {
                Err(err) => {
                    if registered {
                        self.decrement_waiters().await;
                    }
                    return Err(err);
                }
                Ok(Some(outcome)) => {
                    if registered {
                        self.decrement_waiters().await;
                    }
                    break outcome;
                }
                Ok(None) => {
                    if !registered {
                        self.increment_waiters().await;
                        registered = true;
                    }
                    if Instant::now() >= deadline {
                        self.decrement_waiters().await;
                        return Err(Error::ClientError(crate::error::Neo4jError {
                            code: "Client.ConnectionAcquisitionTimeout".into(),
                            message: "timed out waiting for a pooled connection".into(),
                            gql_status: None,
                        }));
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let _ = tokio::time::timeout(remaining, self.waiter_woken.notified()).await;
                }
            }
        };

        match outcome {
            TryAcquire::Ready(conn) => Ok(PoolGuard {
                pool: self.clone(),
                conn: Some(conn),
            }),
            TryAcquire::MustCreate => match connect().await {
                Ok(conn) => Ok(PoolGuard {
                    pool: self.clone(),
                    conn: Some(conn),
                }),
                Err(err) => {
                    self.release_creation_slot().await;
                    Err(err)
                }
            },
        }
    }

    async fn try_acquire_once(&self) -> Result<Option<TryAcquire<C>>> {
        let mut state = self.state.lock().await;
        if state.terminating {
            return Err(Error::ServiceUnavailable("pool is closed".into()));
        }

        while let Some(mut idle) = state.idle.pop_front() {
            if idle.conn.created_at().elapsed() > self.config.max_lifetime {
                continue;
            }
            if let Some(idle_timeout) = self.config.idle_timeout {
                if idle.became_idle_at.elapsed() > idle_timeout {
                    continue;
                }
            }
            if let Some(threshold) = self.config.liveness_threshold {
                if idle.became_idle_at.elapsed() >= threshold || threshold == Duration::ZERO {
                    drop(state);
                    if idle.conn.probe().await.is_err() {
                        state = self.state.lock().await;
                        continue;
                    }
                    state = self.state.lock().await;
                }
            }
            state.in_use += 1;
            return Ok(Some(TryAcquire::Ready(idle.conn)));
        }

        if state.in_use < self.config.max_pool_size {
            state.in_use += 1;
            return Ok(Some(TryAcquire::MustCreate));
        }

        Ok(None)
    }

    async fn increment_waiters(&self) {
        self.state.lock().await.waiters += 1;
    }

    async fn decrement_waiters(&self) {
        let mut state = self.state.lock().await;
        state.waiters = state.waiters.saturating_sub(1);
    }

    async fn release_creation_slot(&self) {
        let mut state = self.state.lock().await;
        state.in_use = state.in_use.saturating_sub(1);
        self.waiter_woken.notify_one();
    }

    /// Release a connection back to the pool (§4.6 Release).
    async fn release(&self, mut conn: C) {
        let reclaim_failed = conn.reclaim().await.is_err();
        let mut state = self.state.lock().await;
        state.in_use = state.in_use.saturating_sub(1);
        if reclaim_failed || conn.is_broken() {
            // Dropped here; `in_use` already decremented, `idle` untouched.
        } else if state.idle.len() >= self.config.max_idle_size() {
            // Over the idle cap: drop rather than grow `idle` unbounded.
        } else {
            state.idle.push_back(Idle {
                conn,
                became_idle_at: Instant::now(),
            });
        }
        self.waiter_woken.notify_one();
    }

    /// Mark the pool terminating: reject new acquires, drop idle connections immediately.
    /// In-use connections drain back through `release` and are dropped there instead of
    /// being re-pooled, since `terminating` short-circuits future acquires.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.terminating = true;
        state.idle.clear();
        self.waiter_woken.notify_waiters();
    }

    pub async fn idle_len(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    pub async fn in_use_len(&self) -> usize {
        self.state.lock().await.in_use
    }

    pub async fn waiters_len(&self) -> usize {
        self.state.lock().await.waiters
    }
}

enum TryAcquire<C> {
    Ready(C),
    MustCreate,
}

/// A leased connection. Returns itself to the pool on drop.
pub struct PoolGuard<C: PooledConnection> {
    pool: Arc<ConnectionPool<C>>,
    conn: Option<C>,
}

impl<C: PooledConnection> PoolGuard<C> {
    pub fn as_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection taken from a live guard")
    }
}

impl<C: PooledConnection + 'static> Drop for PoolGuard<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let handle = self.pool.handle.clone();
            // Pool release needs `.await`; spawn so `Drop` itself stays synchronous. Spawned
            // via the handle captured at pool creation rather than the bare `tokio::spawn`,
            // since the guard can be dropped on a plain thread with no ambient runtime
            // context (the blocking facade). The connection has no other owner at this
            // point, so this is safe even if the runtime is shutting down (the task is
            // simply dropped with it).
            handle.spawn(async move {
                pool.release(conn).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConn {
        created_at: Instant,
        broken: bool,
    }

    #[async_trait::async_trait]
    impl PooledConnection for FakeConn {
        fn created_at(&self) -> Instant {
            self.created_at
        }
        fn is_broken(&self) -> bool {
            self.broken
        }
        async fn probe(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn test_address() -> Address {
        Address {
            host: "localhost".into(),
            port: 7687,
        }
    }

    #[tokio::test]
    async fn acquire_creates_new_connection_when_pool_is_empty() {
        let pool = Arc::new(ConnectionPool::new(test_address(), DriverConfig::default().with_max_pool_size(2)));
        let created = AtomicUsize::new(0);
        let guard = pool
            .acquire(|| async {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(FakeConn {
                    created_at: Instant::now(),
                    broken: false,
                })
            })
            .await
            .unwrap();
        assert_eq!(pool.in_use_len().await, 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn acquisition_beyond_max_pool_size_times_out() {
        let config = DriverConfig::default()
            .with_max_pool_size(1)
            .with_acquisition_timeout(Duration::from_millis(50));
        let pool = Arc::new(ConnectionPool::new(test_address(), config));
        let _held = pool
            .acquire(|| async {
                Ok(FakeConn {
                    created_at: Instant::now(),
                    broken: false,
                })
            })
            .await
            .unwrap();

        let second = pool
            .acquire(|| async {
                Ok(FakeConn {
                    created_at: Instant::now(),
                    broken: false,
                })
            })
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn idle_plus_in_use_never_exceeds_max_pool_size() {
        let pool = Arc::new(ConnectionPool::new(test_address(), DriverConfig::default().with_max_pool_size(3)));
        for _ in 0..3 {
            let guard = pool
                .acquire(|| async {
                    Ok(FakeConn {
                        created_at: Instant::now(),
                        broken: false,
                    })
                })
                .await
                .unwrap();
            drop(guard);
            tokio::task::yield_now().await;
        }
        assert!(pool.idle_len().await + pool.in_use_len().await <= 3);
    }

    #[tokio::test]
    async fn closing_the_pool_rejects_new_acquires() {
        let pool = Arc::new(ConnectionPool::new(test_address(), DriverConfig::default()));
        pool.close().await;
        let result = pool
            .acquire(|| async {
                Ok(FakeConn {
                    created_at: Instant::now(),
                    broken: false,
                })
            })
            .await;
        assert!(result.is_err());
    }

    /// A waiter that gets woken spuriously (another release satisfies a different
    /// waiter first) must still count as exactly one waiter, not one per retry.
    #[tokio::test]
    async fn one_blocked_acquirer_registers_as_a_single_waiter() {
        let config = DriverConfig::default()
            .with_max_pool_size(1)
            .with_acquisition_timeout(Duration::from_millis(200));
        let pool = Arc::new(ConnectionPool::new(test_address(), config));
        let held = pool
            .acquire(|| async {
                Ok(FakeConn {
                    created_at: Instant::now(),
                    broken: false,
                })
            })
            .await
            .unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            waiter_pool
                .acquire(|| async {
                    Ok(FakeConn {
                        created_at: Instant::now(),
                        broken: false,
                    })
                })
                .await
        });

        // Give the waiter a few scheduling turns to observe the full pool and register,
        // without ever being handed a connection (none is released yet).
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.waiters_len().await, 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.waiters_len().await, 0);
    }
}
