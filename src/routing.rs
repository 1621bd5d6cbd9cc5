//! The client-side routing table (C7, §4.7): readers/writers/routers sets with a TTL,
//! refreshed single-flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::Address;
use crate::error::{Error, Result};

/// Read vs. write access, used to pick which address set to draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A snapshot of routing state for one database, as returned by a `ROUTE` call.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    pub readers: Vec<Address>,
    pub writers: Vec<Address>,
    pub routers: Vec<Address>,
    pub expires_at: Instant,
    /// Bumped on every refresh; used only to let callers notice a stale generation.
    pub generation: u64,
}

impl RoutingTable {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn set_for(&self, mode: AccessMode) -> &[Address] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }
}

/// A `ROUTE` call, abstracted so this module doesn't depend on the connection layer
/// directly. The real implementation sends `ROUTE` (or the legacy procedure call) against
/// a live router connection.
#[async_trait::async_trait]
pub trait RouteFetcher: Send + Sync {
    async fn fetch(&self, database: Option<&str>, context: &[(String, String)]) -> Result<RoutingTable>;
}

struct Inner {
    table: Option<RoutingTable>,
    round_robin_reader: usize,
    round_robin_writer: usize,
}

/// Per-database routing state plus the single-flight guard for refresh.
pub struct RoutingTableManager {
    state: Mutex<Inner>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Default for RoutingTableManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(Inner {
                table: None,
                round_robin_reader: 0,
                round_robin_writer: 0,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }
}

impl RoutingTableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next address for `mode`, refreshing first if the table is missing,
    /// expired, or the relevant set is empty (§4.7).
    pub async fn select(
        &self,
        fetcher: &dyn RouteFetcher,
        database: Option<&str>,
        context: &[(String, String)],
        mode: AccessMode,
    ) -> Result<Address> {
        self.ensure_fresh(fetcher, database, context, mode).await?;

        let mut state = self.state.lock().await;
        let table = state
            .table
            .clone()
            .ok_or_else(|| Error::ServiceUnavailable("no routing table available".into()))?;
        let addresses = table.set_for(mode);
        if addresses.is_empty() {
            return Err(Error::ServiceUnavailable(format!(
                "no {mode:?} addresses available after refresh"
            )));
        }
        let index = match mode {
            AccessMode::Read => &mut state.round_robin_reader,
            AccessMode::Write => &mut state.round_robin_writer,
        };
        let chosen = addresses[*index % addresses.len()].clone();
        *index = index.wrapping_add(1);
        Ok(chosen)
    }

    async fn ensure_fresh(
        &self,
        fetcher: &dyn RouteFetcher,
        database: Option<&str>,
        context: &[(String, String)],
        mode: AccessMode,
    ) -> Result<()> {
        let needs_refresh = {
            let state = self.state.lock().await;
            match &state.table {
                None => true,
                Some(table) => table.is_expired() || table.set_for(mode).is_empty(),
            }
        };
        if !needs_refresh {
            return Ok(());
        }
        self.refresh(fetcher, database, context).await
    }

    /// Single-flight refresh: a second caller that finds a refresh already underway waits
    /// on the same lock rather than issuing its own `ROUTE` (§5, §8).
    pub async fn refresh(
        &self,
        fetcher: &dyn RouteFetcher,
        database: Option<&str>,
        context: &[(String, String)],
    ) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        // Re-check under the refresh lock: another task may have just finished refreshing.
        {
            let state = self.state.lock().await;
            if let Some(table) = &state.table {
                if !table.is_expired() {
                    return Ok(());
                }
            }
        }
        let table = fetcher.fetch(database, context).await?;
        let mut state = self.state.lock().await;
        state.table = Some(table);
        Ok(())
    }

    /// Remove `address` from the writers set after `NotALeader`/`ForbiddenOnReadOnlyDatabase`.
    pub async fn forget_writer(&self, address: &Address) {
        let mut state = self.state.lock().await;
        if let Some(table) = &mut state.table {
            table.writers.retain(|a| a != address);
        }
    }

    /// Remove `address` from every set after `Neo.TransientError.General.DatabaseUnavailable`.
    pub async fn forget_everywhere(&self, address: &Address) {
        let mut state = self.state.lock().await;
        if let Some(table) = &mut state.table {
            table.readers.retain(|a| a != address);
            table.writers.retain(|a| a != address);
            table.routers.retain(|a| a != address);
        }
    }

    pub async fn current_generation(&self) -> Option<u64> {
        self.state.lock().await.table.as_ref().map(|t| t.generation)
    }
}

/// De-duplicate an address list while preserving first-seen order, used when merging
/// routing entries from a `ROUTE` response.
pub fn dedupe_preserving_order(addresses: Vec<Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticFetcher {
        calls: Arc<AtomicU32>,
        readers: Vec<Address>,
        writers: Vec<Address>,
    }

    #[async_trait::async_trait]
    impl RouteFetcher for StaticFetcher {
        async fn fetch(&self, _database: Option<&str>, _context: &[(String, String)]) -> Result<RoutingTable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RoutingTable {
                readers: self.readers.clone(),
                writers: self.writers.clone(),
                routers: vec![Address {
                    host: "router".into(),
                    port: 7687,
                }],
                expires_at: Instant::now() + Duration::from_secs(300),
                generation: 1,
            })
        }
    }

    fn addr(host: &str) -> Address {
        Address {
            host: host.to_string(),
            port: 7687,
        }
    }

    #[tokio::test]
    async fn refresh_is_single_flight_under_concurrent_readers() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = Arc::new(StaticFetcher {
            calls: calls.clone(),
            readers: vec![addr("a"), addr("b")],
            writers: vec![addr("w")],
        });
        let manager = Arc::new(RoutingTableManager::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let fetcher = fetcher.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .select(fetcher.as_ref(), None, &[], AccessMode::Read)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forgetting_writer_removes_it_from_writers_only() {
        let fetcher = StaticFetcher {
            calls: Arc::new(AtomicU32::new(0)),
            readers: vec![addr("a")],
            writers: vec![addr("w")],
        };
        let manager = RoutingTableManager::new();
        manager.refresh(&fetcher, None, &[]).await.unwrap();
        manager.forget_writer(&addr("w")).await;
        let state = manager.state.lock().await;
        assert!(state.table.as_ref().unwrap().writers.is_empty());
        assert_eq!(state.table.as_ref().unwrap().readers.len(), 1);
    }

    #[tokio::test]
    async fn empty_writer_set_after_refresh_surfaces_service_unavailable() {
        let fetcher = StaticFetcher {
            calls: Arc::new(AtomicU32::new(0)),
            readers: vec![addr("a")],
            writers: vec![],
        };
        let manager = RoutingTableManager::new();
        let result = manager
            .select(&fetcher, None, &[], AccessMode::Write)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn dedupe_preserves_first_seen_order() {
        let addresses = vec![addr("a"), addr("b"), addr("a")];
        assert_eq!(dedupe_preserving_order(addresses), vec![addr("a"), addr("b")]);
    }
}
