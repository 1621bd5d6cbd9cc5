//! The response pipeline (§4.4): a FIFO of handlers, one per request in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{CodeTable, Error, Result};
use crate::protocol::{Fields, Response};

/// Reacts to the responses a single request produces. `RUN` and `BEGIN` only ever see
/// `on_success`/`on_failure`; `PULL`/`DISCARD` also see `on_record` for every row and
/// `has_more` on the terminal `SUCCESS`.
///
/// Errors are borrowed rather than owned: `Error::LibraryBug` wraps a `color_eyre::Report`,
/// which isn't `Clone`, and the sticky error from §4.4 must be handed to every subsequent
/// `IGNORED` handler without being consumed.
pub trait ResponseHandler: Send {
    fn on_record(&mut self, _fields: Vec<crate::packstream::Value>) {}
    fn on_success(&mut self, metadata: Fields);
    fn on_failure(&mut self, error: &Error);
    /// Called instead of `on_failure` when the pipeline is already poisoned (§4.4).
    fn on_ignored(&mut self, sticky_error: &Error) {
        self.on_failure(sticky_error);
    }
}

/// A one-shot handler built from closures, for requests (`RESET`, `COMMIT`, `GOODBYE`, ...)
/// that only care about the terminal outcome.
pub struct OneShot<F, G>
where
    F: FnOnce(Fields) + Send,
    G: FnOnce(&Error) + Send,
{
    on_success: Option<F>,
    on_failure: Option<G>,
}

impl<F, G> OneShot<F, G>
where
    F: FnOnce(Fields) + Send,
    G: FnOnce(&Error) + Send,
{
    pub fn new(on_success: F, on_failure: G) -> Self {
        Self {
            on_success: Some(on_success),
            on_failure: Some(on_failure),
        }
    }
}

impl<F, G> ResponseHandler for OneShot<F, G>
where
    F: FnOnce(Fields) + Send,
    G: FnOnce(&Error) + Send,
{
    fn on_success(&mut self, metadata: Fields) {
        if let Some(f) = self.on_success.take() {
            f(metadata);
        }
    }

    fn on_failure(&mut self, error: &Error) {
        if let Some(g) = self.on_failure.take() {
            g(error);
        }
    }
}

/// FIFO of boxed handlers awaiting a response, plus the sticky error a `FAILURE` leaves
/// behind for every subsequent `IGNORED` on the same connection (§4.4).
#[derive(Default)]
pub struct ResponsePipeline {
    pending: VecDeque<Box<dyn ResponseHandler>>,
    sticky_error: Option<Arc<Error>>,
    code_table: CodeTable,
}

impl ResponsePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Box<dyn ResponseHandler>) {
        self.pending.push_back(handler);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Dispatch one decoded response to the head of the queue, per the dequeue/peek rules
    /// in §4.4. Returns whether the dispatch exhausted the pipeline's authority to open
    /// errors (i.e. whether a sticky error was just set).
    pub fn dispatch(&mut self, response: Response) -> Result<()> {
        match response {
            Response::Record(fields) => {
                let handler = self
                    .pending
                    .front_mut()
                    .ok_or_else(|| protocol_violation("RECORD with an empty pipeline"))?;
                handler.on_record(fields);
                Ok(())
            }
            Response::Success(metadata) => {
                let mut handler = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| protocol_violation("SUCCESS with an empty pipeline"))?;
                handler.on_success(metadata);
                Ok(())
            }
            Response::Failure {
                code,
                message,
                gql_status,
            } => {
                let mut handler = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| protocol_violation("FAILURE with an empty pipeline"))?;
                let error = self.code_table.classify(&code, &message, gql_status.as_deref());
                handler.on_failure(&error);
                self.sticky_error = Some(Arc::new(error));
                Ok(())
            }
            Response::Ignored => {
                let mut handler = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| protocol_violation("IGNORED with an empty pipeline"))?;
                match &self.sticky_error {
                    Some(sticky) => handler.on_ignored(sticky),
                    None => handler.on_ignored(&Error::ProtocolError(
                        "IGNORED with no prior FAILURE".into(),
                    )),
                }
                Ok(())
            }
        }
    }

    /// Poison every still-pending handler with `error`, for I/O failure or DEFUNCT (§4.3).
    pub fn poison_all(&mut self, error: Error) {
        while let Some(mut handler) = self.pending.pop_front() {
            handler.on_failure(&error);
        }
        self.sticky_error = Some(Arc::new(error));
    }

    /// Clear the sticky error, done on a successful RESET (§4.3).
    pub fn clear_sticky(&mut self) {
        self.sticky_error = None;
    }
}

fn protocol_violation(message: &str) -> Error {
    Error::ProtocolError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        successes: Arc<Mutex<Vec<Fields>>>,
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl ResponseHandler for Recorder {
        fn on_success(&mut self, metadata: Fields) {
            self.successes.lock().unwrap().push(metadata);
        }
        fn on_failure(&mut self, error: &Error) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn record_peeks_without_dequeuing() {
        let mut pipeline = ResponsePipeline::new();
        let successes = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        pipeline.push(Box::new(Recorder {
            successes: successes.clone(),
            failures: failures.clone(),
        }));
        pipeline
            .dispatch(Response::Record(vec![crate::packstream::Value::Integer(1)]))
            .unwrap();
        assert_eq!(pipeline.len(), 1, "RECORD must not dequeue the handler");
        pipeline.dispatch(Response::Success(Fields::new())).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(successes.lock().unwrap().len(), 1);
    }

    #[test]
    fn failure_poisons_subsequent_ignored() {
        let mut pipeline = ResponsePipeline::new();
        let successes = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        pipeline.push(Box::new(Recorder {
            successes: successes.clone(),
            failures: failures.clone(),
        }));
        pipeline.push(Box::new(Recorder {
            successes: successes.clone(),
            failures: failures.clone(),
        }));
        pipeline
            .dispatch(Response::Failure {
                code: "Neo.ClientError.Statement.SyntaxError".into(),
                message: "bad".into(),
                gql_status: None,
            })
            .unwrap();
        pipeline.dispatch(Response::Ignored).unwrap();
        assert_eq!(failures.lock().unwrap().len(), 2);
    }

    #[test]
    fn response_with_empty_queue_is_protocol_violation() {
        let mut pipeline = ResponsePipeline::new();
        assert!(pipeline.dispatch(Response::Success(Fields::new())).is_err());
    }

    #[test]
    fn poison_all_clears_the_queue() {
        let mut pipeline = ResponsePipeline::new();
        let successes = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        pipeline.push(Box::new(Recorder {
            successes,
            failures: failures.clone(),
        }));
        pipeline.poison_all(Error::ServiceUnavailable("down".into()));
        assert!(pipeline.is_empty());
        assert_eq!(failures.lock().unwrap().len(), 1);
    }
}
