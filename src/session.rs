//! Session / transaction FSM (C9, §4.9).

use crate::error::{Error, Result};
use crate::protocol::Fields;

/// Read vs. write intent for a piece of work, mirrors `routing::AccessMode` but kept
/// separate since a session may run against a non-routed (`bolt://`) driver that never
/// consults the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// The bookmark set a session carries between transactions (§4.9, §8 scenario 4).
#[derive(Debug, Clone, Default)]
pub struct BookmarkSet {
    bookmarks: Vec<String>,
}

impl BookmarkSet {
    pub fn new(bookmarks: Vec<String>) -> Self {
        Self { bookmarks }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.bookmarks
    }

    /// Replace the set with the single bookmark a commit returned (§4.9).
    pub fn replace_with_single(&mut self, bookmark: String) {
        self.bookmarks = vec![bookmark];
    }
}

/// What the session is doing right now. A session never has more than one open
/// cursor/transaction at a time (§4.9): starting new work first drains whatever is open.
#[derive(Debug, Default, PartialEq, Eq)]
enum SessionPhase {
    #[default]
    Idle,
    AutoCommitStreaming,
    InExplicitTransaction,
}

/// Configuration for one transaction (explicit or auto-commit).
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    pub timeout: Option<std::time::Duration>,
    pub metadata: Fields,
}

/// Session state independent of any particular connection. The connection itself is
/// leased lazily from the pool on first use and released when the session closes or a
/// routing error forces a new lease (§4.9, §5).
pub struct Session {
    pub database: Option<String>,
    pub access_mode: AccessMode,
    pub bookmarks: BookmarkSet,
    pub impersonated_user: Option<String>,
    phase: SessionPhase,
}

impl Session {
    pub fn new(database: Option<String>, access_mode: AccessMode, bookmarks: BookmarkSet) -> Self {
        Self {
            database,
            access_mode,
            bookmarks,
            impersonated_user: None,
            phase: SessionPhase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SessionPhase::Idle
    }

    /// Begin an explicit transaction. Errors if one is already open; the caller is
    /// expected to have drained any open cursor first (auto-commit RUN doesn't require
    /// this since it has no separate BEGIN).
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(Error::from_debug(
                "begin_transaction called with a transaction or cursor already open",
            ));
        }
        self.phase = SessionPhase::InExplicitTransaction;
        Ok(())
    }

    pub fn start_auto_commit(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(Error::from_debug(
                "start_auto_commit called with a transaction or cursor already open",
            ));
        }
        self.phase = SessionPhase::AutoCommitStreaming;
        Ok(())
    }

    /// On successful commit, replace the bookmark set with the single bookmark returned
    /// in the `COMMIT` `SUCCESS` metadata (§4.9).
    pub fn on_commit_success(&mut self, bookmark: Option<String>) {
        if let Some(bookmark) = bookmark {
            self.bookmarks.replace_with_single(bookmark);
        }
        self.phase = SessionPhase::Idle;
    }

    pub fn on_rollback(&mut self) {
        self.phase = SessionPhase::Idle;
    }

    pub fn on_auto_commit_finished(&mut self, bookmark: Option<String>) {
        if let Some(bookmark) = bookmark {
            self.bookmarks.replace_with_single(bookmark);
        }
        self.phase = SessionPhase::Idle;
    }

    pub fn in_transaction(&self) -> bool {
        self.phase == SessionPhase::InExplicitTransaction
    }
}
