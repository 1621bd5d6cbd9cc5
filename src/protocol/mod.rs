//! The Bolt wire protocol: handshake, chunked framing, message shapes and auth tokens.

pub mod auth;
pub mod framing;
pub mod handshake;
pub mod message;

pub use auth::AuthToken;
pub use message::{Fields, Request, Response};
