//! A thin blocking facade over the async core, for callers that don't run their own
//! Tokio runtime.
//!
//! Per the redesign away from the original's hand-duplicated sync implementation: this
//! module owns exactly one dedicated multi-thread runtime and blocks on it. It adds no
//! protocol logic of its own — every call here is `runtime.block_on(async_call)`.

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::config::{Address, DriverConfig};
use crate::connection::conn::BoltConnection;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolGuard};

/// Builds and owns the runtime a [`BlockingDriver`] blocks on. Kept separate from the
/// driver so a caller embedding this crate inside an existing multi-threaded program can
/// size the thread pool deliberately instead of accepting Tokio's defaults.
fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::IoError)
}

/// A connection pool reachable without an `.await`. Every method blocks the calling
/// thread until the underlying async call completes.
pub struct BlockingPool {
    runtime: Runtime,
    pool: Arc<ConnectionPool<BoltConnection>>,
    config: DriverConfig,
}

impl BlockingPool {
    pub fn connect(config: DriverConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        // `ConnectionPool::new` captures `Handle::current()` for its guard's release-on-drop;
        // entering the runtime here makes that handle resolvable even though the pool itself
        // is constructed on the calling thread, outside any `block_on`.
        let pool = {
            let _guard = runtime.enter();
            Arc::new(ConnectionPool::new(config.address.clone(), config.clone()))
        };
        Ok(Self { runtime, pool, config })
    }

    /// Acquire a connection, blocking the calling thread until one is available or
    /// `AcquisitionTimeout` elapses.
    pub fn acquire(&self) -> Result<PoolGuard<BoltConnection>> {
        let address = self.config.address.clone();
        let encryption = self.config.encryption.clone();
        let user_agent = self.config.user_agent.clone();
        let auth = self.config.auth.clone();
        self.runtime.block_on(self.pool.acquire(|| {
            let address = address.clone();
            let encryption = encryption.clone();
            let user_agent = user_agent.clone();
            let auth = auth.clone();
            async move {
                BoltConnection::connect(&address.host, address.port, encryption, &user_agent, auth.as_ref()).await
            }
        }))
    }

    pub fn address(&self) -> &Address {
        self.pool.address()
    }

    pub fn close(&self) {
        self.runtime.block_on(self.pool.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_runtime_succeeds() {
        assert!(build_runtime().is_ok());
    }

    #[test]
    fn blocking_pool_reports_its_configured_address() {
        let mut config = DriverConfig::default();
        config.address = Address {
            host: "localhost".into(),
            port: 7687,
        };
        let pool = BlockingPool::connect(config).unwrap();
        assert_eq!(pool.address().port, 7687);
    }
}
