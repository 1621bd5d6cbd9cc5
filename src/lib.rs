//! Core protocol and connection machinery for a Bolt graph-database client.
//!
//! This crate implements the wire-level pieces a higher-level driver builds on: the
//! PackStream codec, the Bolt message pipeline and per-connection state machine, a bounded
//! connection pool, a client-side routing table, a retry engine, and a lazy result cursor.
//! It does not implement a query-builder DSL, object mapping, or any particular
//! application-facing session API beyond the FSM in [`session`].

pub mod buffer;
pub mod config;
pub mod connection;
pub mod constant;
pub mod cursor;
pub mod error;
pub mod packstream;
pub mod protocol;
pub mod retry;
pub mod routing;
pub mod session;
mod stream;

#[cfg(feature = "tokio-runtime")]
pub mod pool;

#[cfg(feature = "blocking")]
pub mod blocking;

pub use config::{Address, DriverConfig, EncryptionLevel, UriScheme};
pub use connection::BoltConnection;
pub use cursor::{Page, PageSource, Record, ResultCursor, Summary};
pub use error::{Error, Result};
pub use protocol::AuthToken;
pub use session::{AccessMode, BookmarkSet, Session};
