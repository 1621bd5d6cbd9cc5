//! Error taxonomy for the driver core.
//!
//! Mirrors the server-side classification in the Bolt specification:
//! `ClientError`, `TransientError`, `DatabaseError`, plus the client-local
//! conditions (`ServiceUnavailable`, `SessionExpired`, `ProtocolError`,
//! `SecurityError`) that never come from a `FAILURE` message.

use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

/// A classified server error, translated from a Bolt `FAILURE` code.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct Neo4jError {
    pub code: String,
    pub message: String,
    pub gql_status: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied invalid input or authentication rejection.
    /// Fatal by default; `AuthorizationExpired` is retried after re-auth.
    #[error("client error: {0}")]
    ClientError(Neo4jError),

    /// Server-side condition expected to clear up (deadlock, db unavailable). Retryable.
    #[error("transient error: {0}")]
    TransientError(Neo4jError),

    /// Server-internal fatal error. Not retryable; surfaced verbatim.
    #[error("database error: {0}")]
    DatabaseError(Neo4jError),

    /// No suitable server could be reached for the request. Retryable at the transaction level.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A routed writer or reader turned out to be invalid; retried after forgetting the address.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Local or remote violation of the wire format. The connection is destroyed.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// TLS or auth-layer failure. Not retryable.
    #[error("security error: {0}")]
    SecurityError(String),

    /// A value could not be represented in PackStream (non-string map key, integer
    /// out of range, programmer error in a struct field count).
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("bad configuration: {0}")]
    BadConfigError(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    /// An invariant internal to this crate was violated; indicates a bug here, not in the
    /// caller or the server.
    #[error("bug in bolt-driver-core: {0}")]
    LibraryBug(color_eyre::Report),
}

/// Manual `Clone`: every variant a `FAILURE`/`IGNORED` dispatch can hand to a
/// [`crate::connection::pipeline::ResponseHandler`] is `String`-based and trivially
/// cloneable; `IoError`/`LibraryBug` carry non-`Clone` payloads (`std::io::Error`,
/// `color_eyre::Report`) so they're rebuilt from their rendered message instead. This lets
/// a handler forward the pipeline's already-classified error to its caller (e.g. through a
/// `oneshot` reply) without collapsing it into a generic `ProtocolError`.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::ClientError(e) => Error::ClientError(e.clone()),
            Error::TransientError(e) => Error::TransientError(e.clone()),
            Error::DatabaseError(e) => Error::DatabaseError(e.clone()),
            Error::ServiceUnavailable(s) => Error::ServiceUnavailable(s.clone()),
            Error::SessionExpired(s) => Error::SessionExpired(s.clone()),
            Error::ProtocolError(s) => Error::ProtocolError(s.clone()),
            Error::SecurityError(s) => Error::SecurityError(s.clone()),
            Error::EncodingError(s) => Error::EncodingError(s.clone()),
            Error::IoError(e) => Error::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Error::BadConfigError(s) => Error::BadConfigError(s.clone()),
            Error::Timeout(s) => Error::Timeout(s.clone()),
            Error::Cancelled => Error::Cancelled,
            Error::LibraryBug(report) => {
                Error::LibraryBug(color_eyre::eyre::eyre!(report.to_string()))
            }
        }
    }
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(color_eyre::eyre::eyre!(format!("{:#?}", err)))
    }

    /// Whether this error is safe to retry inside the retry engine (§7, §8).
    ///
    /// `ServiceUnavailable` and `ConnectionAcquisitionTimeout`-shaped timeouts are only
    /// retryable on the first attempt per `spec.md`; that distinction is applied by the
    /// retry engine itself, not here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientError(_) | Error::ServiceUnavailable(_) | Error::SessionExpired(_)
        ) || self.is_authorization_expired()
    }

    pub fn is_authorization_expired(&self) -> bool {
        matches!(self, Error::ClientError(e) if e.code == "Neo.ClientError.Security.AuthorizationExpired")
    }
}

impl<Src, Dst: ?Sized> From<zerocopy::CastError<Src, Dst>> for Error {
    fn from(err: zerocopy::CastError<Src, Dst>) -> Self {
        Self::LibraryBug(color_eyre::eyre::eyre!("{:#?}", err))
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

/// Longest-wildcard-match classifier for `Neo.Kind.Category.Title` codes (§7).
///
/// Built once and scanned on every `FAILURE`; entries are authored most-specific
/// first so that an exact code wins over a category wildcard, which in turn wins
/// over a kind-level wildcard.
pub(crate) struct CodeTable {
    entries: Vec<(&'static str, fn(Neo4jError) -> Error)>,
}

impl CodeTable {
    pub(crate) fn new() -> Self {
        let entries: Vec<(&'static str, fn(Neo4jError) -> Error)> = vec![
            (
                "Neo.ClientError.Security.AuthorizationExpired",
                Error::ClientError,
            ),
            ("Neo.ClientError.Security.*", |e| Error::SecurityError(e.to_string())),
            ("Neo.ClientError.*", Error::ClientError),
            (
                "Neo.TransientError.General.DatabaseUnavailable",
                Error::TransientError,
            ),
            ("Neo.TransientError.*", Error::TransientError),
            ("Neo.DatabaseError.*", Error::DatabaseError),
        ];
        Self { entries }
    }

    /// Classify a raw `(code, message)` pair from a `FAILURE` response.
    ///
    /// Entries are ranked by specificity: an entry with no wildcard beats one with a
    /// wildcard, and between two wildcard entries the one whose prefix is covered by the
    /// other (i.e. the longer, more specific prefix) wins.
    pub(crate) fn classify(&self, code: &str, message: &str, gql_status: Option<&str>) -> Error {
        let payload = Neo4jError {
            code: code.to_string(),
            message: message.to_string(),
            gql_status: gql_status.map(str::to_string),
        };

        let mut best: Option<(&'static str, fn(Neo4jError) -> Error)> = None;
        for &(pattern, ctor) in &self.entries {
            if Self::matches(pattern, code) {
                match best {
                    None => best = Some((pattern, ctor)),
                    Some((best_pattern, _)) if Self::more_specific(pattern, best_pattern) => {
                        best = Some((pattern, ctor));
                    }
                    _ => {}
                }
            }
        }

        match best {
            Some((_, ctor)) => ctor(payload),
            None => Error::DatabaseError(payload),
        }
    }

    fn matches(pattern: &str, code: &str) -> bool {
        match pattern.strip_suffix(".*") {
            Some(prefix) => code.starts_with(prefix),
            None => pattern == code,
        }
    }

    /// True if `a` is strictly more specific than `b` (longer literal prefix, or `a` has
    /// no wildcard while `b` does).
    fn more_specific(a: &str, b: &str) -> bool {
        let a_exact = !a.ends_with(".*");
        let b_exact = !b.ends_with(".*");
        if a_exact != b_exact {
            return a_exact;
        }
        a.len() > b.len()
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_code_beats_wildcard() {
        let table = CodeTable::new();
        let err = table.classify(
            "Neo.ClientError.Security.AuthorizationExpired",
            "token expired",
            None,
        );
        assert!(matches!(err, Error::ClientError(_)));
        assert!(err.is_authorization_expired());
    }

    #[test]
    fn more_specific_wildcard_beats_general_one() {
        let table = CodeTable::new();
        let err = table.classify(
            "Neo.TransientError.General.DatabaseUnavailable",
            "db unavailable",
            None,
        );
        assert!(matches!(err, Error::TransientError(_)));
    }

    #[test]
    fn unknown_code_falls_back_to_database_error() {
        let table = CodeTable::new();
        let err = table.classify("Neo.Unknown.Weird.Thing", "???", None);
        assert!(matches!(err, Error::DatabaseError(_)));
    }

    #[test]
    fn client_error_is_fatal_by_default() {
        let table = CodeTable::new();
        let err = table.classify("Neo.ClientError.Statement.SyntaxError", "bad syntax", None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_error_is_retryable() {
        let table = CodeTable::new();
        let err = table.classify("Neo.TransientError.Transaction.DeadlockDetected", "deadlock", None);
        assert!(err.is_retryable());
    }
}
