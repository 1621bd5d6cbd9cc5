//! A single Bolt connection: state machine, response pipeline, and the socket loop.

pub mod conn;
pub mod pipeline;
pub mod state;

pub use conn::BoltConnection;
pub use pipeline::{OneShot, ResponseHandler, ResponsePipeline};
pub use state::{ConnectionState, Transition};
