//! The async Bolt connection: handshake, framed I/O, and response dispatch (C3).

use std::collections::VecDeque;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::instrument;
use zerocopy::FromBytes;

use crate::buffer::BufferSet;
use crate::config::EncryptionLevel;
use crate::connection::pipeline::{ResponseHandler, ResponsePipeline};
use crate::connection::state::{ConnectionState, Transition};
use crate::cursor::{Page, PageSource, ResultCursor, Summary};
use crate::error::{Error, Result};
use crate::packstream::Value;
use crate::protocol::{auth::AuthToken, framing, handshake, message::Fields, Request, Response};
use crate::stream::Stream;

/// A single Bolt connection over a TCP stream (optionally TLS-wrapped; see `tls` feature).
///
/// All connection state is single-threaded from the connection's own perspective (§5):
/// nothing here is `Sync`, and a connection is exclusively owned by the pool or one
/// session at any moment.
pub struct BoltConnection {
    stream: Stream,
    buffers: BufferSet,
    pipeline: ResponsePipeline,
    /// One entry per request sent and not yet resolved by a terminal response, in send
    /// order — mirrors the pipeline's own FIFO so the state machine can tell which
    /// transition a given SUCCESS/FAILURE corresponds to (§4.3).
    pending_transitions: VecDeque<Transition>,
    state: ConnectionState,
    created_at: Instant,
    user_agent: String,
    /// Set when a [`ResultCursor`] borrowing this connection was dropped before exhaustion
    /// (§4.5 step 5). `reclaim` issues the deferred `DISCARD` the next time the pool would
    /// otherwise hand this connection back out idle.
    pending_discard: bool,
}

impl BoltConnection {
    /// Connect, perform the handshake, and authenticate. Mirrors the three-step shape of
    /// the teacher's `Conn::new`/`new_with_stream` split, generalized to Bolt's HELLO/LOGON
    /// exchange instead of a MySQL handshake.
    #[instrument(skip_all, fields(host = %host, port = port))]
    pub async fn connect(
        host: &str,
        port: u16,
        encryption: EncryptionLevel,
        user_agent: &str,
        auth: Option<&AuthToken>,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        let stream = Stream::plain(tcp);
        let stream = if encryption == EncryptionLevel::None {
            stream
        } else {
            stream
                .upgrade(host, encryption)
                .await
                .map_err(Error::IoError)?
        };
        Self::connect_with_stream(stream, user_agent, auth).await
    }

    async fn connect_with_stream(stream: Stream, user_agent: &str, auth: Option<&AuthToken>) -> Result<Self> {
        let mut conn = Self {
            stream,
            buffers: BufferSet::new(),
            pipeline: ResponsePipeline::new(),
            pending_transitions: VecDeque::new(),
            state: ConnectionState::Negotiating,
            created_at: Instant::now(),
            user_agent: user_agent.to_string(),
            pending_discard: false,
        };
        conn.negotiate_version().await?;
        conn.hello_and_authenticate(auth).await?;
        Ok(conn)
    }

    #[instrument(skip_all)]
    async fn negotiate_version(&mut self) -> Result<()> {
        let offer = handshake::default_handshake();
        if let Err(err) = self.stream.write_all(&offer).await {
            return Err(self.fail_io(err));
        }
        if let Err(err) = self.stream.flush().await {
            return Err(self.fail_io(err));
        }

        let mut response = [0u8; 4];
        if let Err(err) = self.stream.read_exact(&mut response).await {
            return Err(self.fail_io(err));
        }
        match handshake::parse_chosen_version(response) {
            Ok(_version) => Ok(()),
            Err(err) => Err(self.fail_protocol(err)),
        }
    }

    #[instrument(skip_all)]
    async fn hello_and_authenticate(&mut self, auth: Option<&AuthToken>) -> Result<()> {
        let extra: Fields = vec![
            ("user_agent".to_string(), Value::String(self.user_agent.clone())),
            ("patch_bolt".to_string(), Value::List(vec![Value::String("utc".into())])),
        ];
        self.request_and_await(Request::Hello { extra }, Transition::Hello)
            .await?;

        let token = auth.cloned().unwrap_or(AuthToken::None);
        self.request_and_await(
            Request::Logon {
                auth: token.to_fields(),
            },
            Transition::Auth,
        )
        .await?;
        Ok(())
    }

    /// Re-authenticate a connection that's already `READY`: `LOGOFF` immediately followed
    /// by `LOGON`, with no intervening `RESET` (§9 Open Questions — chosen for latency
    /// over the alternative of resetting between the two).
    #[instrument(skip_all)]
    pub async fn reauthenticate(&mut self, auth: &AuthToken) -> Result<()> {
        self.request_and_await(Request::Logoff, Transition::Auth).await?;
        self.request_and_await(
            Request::Logon {
                auth: auth.to_fields(),
            },
            Transition::Auth,
        )
        .await?;
        Ok(())
    }

    /// Send one request and block until its terminal response arrives. Used for
    /// handshake-time messages that never pipeline with anything else.
    async fn request_and_await(&mut self, request: Request, transition: Transition) -> Result<Fields> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(request, Box::new(AwaitHandler { reply: Some(tx) }), transition)
            .await?;
        self.pump_until(rx).await
    }

    /// Send `RUN` and its first `PULL` back to back, before reading any response (§4.5 step
    /// 1, §8 scenario 2's pipelining optimization). Both responses are then pumped off the
    /// wire here — `RUN`'s `SUCCESS` for the field names, then the first page's own
    /// RECORD/SUCCESS frames — before the cursor is handed back, so nothing is left
    /// in-flight for the cursor itself to drive; it only ever asks its `PageSource` for
    /// pages after the first.
    #[instrument(skip_all, fields(fetch_size = fetch_size))]
    pub async fn run(
        &mut self,
        query: String,
        parameters: Fields,
        extra: Fields,
        fetch_size: i64,
    ) -> Result<ResultCursor<'_>> {
        let (run_tx, run_rx) = tokio::sync::oneshot::channel();
        self.send(
            Request::Run { query, parameters, extra },
            Box::new(AwaitHandler { reply: Some(run_tx) }),
            Transition::Run,
        )
        .await?;

        let (page_tx, page_rx) = tokio::sync::oneshot::channel();
        self.send(
            Request::Pull { n: fetch_size, qid: -1 },
            Box::new(PageHandler {
                records: Vec::new(),
                reply: Some(page_tx),
            }),
            Transition::PullOrDiscard,
        )
        .await?;
        self.flush().await?;

        let metadata = self.pump_until(run_rx).await?;
        let fields = extract_field_names(&metadata)?;
        let first_page = self.pump_until(page_rx).await?;
        Ok(ResultCursor::with_first_page(fields, fetch_size, self, first_page))
    }

    /// Encode and flush `request`, registering `handler` in the pipeline. The state
    /// transition it produces is recorded and applied once the matching response arrives.
    #[instrument(skip_all, fields(request = request.name()))]
    pub async fn send(
        &mut self,
        request: Request,
        handler: Box<dyn ResponseHandler>,
        transition: Transition,
    ) -> Result<()> {
        if !self.state.accepts(transition) {
            return Err(Error::from_debug(format!(
                "{:?} is not legal from {:?}",
                transition, self.state
            )));
        }
        let message = {
            let buf = self.buffers.new_message_buffer();
            if let Err(err) = request.encode(buf) {
                return Err(self.fail_protocol(err));
            }
            buf.clone()
        };
        let framed = {
            let buf = self.buffers.new_framed_buffer();
            framing::encode_chunks(&message, buf);
            buf.clone()
        };
        if let Err(err) = self.stream.write_all(&framed).await {
            return Err(self.fail_io(err));
        }
        self.pipeline.push(handler);
        self.pending_transitions.push_back(transition);
        Ok(())
    }

    /// Force any buffered writes to the socket (§4.3 send policy).
    pub async fn flush(&mut self) -> Result<()> {
        match self.stream.flush().await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_io(err)),
        }
    }

    /// Read and dispatch one response off the wire, advancing the state machine.
    #[instrument(skip_all)]
    pub async fn poll_one_response(&mut self) -> Result<()> {
        let payload = self.read_one_message().await?;
        let response = match Response::decode(&payload) {
            Ok(response) => response,
            Err(err) => return Err(self.fail_protocol(err)),
        };
        let has_more = matches!(&response, Response::Success(fields) if has_more_flag(fields));
        let is_terminal = !matches!(response, Response::Record(_));

        if let Err(err) = self.pipeline.dispatch(response.clone()) {
            return Err(self.fail_protocol(err));
        }

        if is_terminal {
            if let Some(transition) = self.pending_transitions.pop_front() {
                let next_state = match &response {
                    Response::Success(_) => match self.state.on_success(transition, has_more) {
                        Ok(state) => state,
                        Err(err) => return Err(self.fail_protocol(err)),
                    },
                    Response::Failure { .. } => self.state.on_failure(transition),
                    Response::Ignored | Response::Record(_) => self.state,
                };
                let was_reset_success =
                    transition == Transition::Reset && matches!(response, Response::Success(_));
                self.state = next_state;
                if was_reset_success {
                    self.pipeline.clear_sticky();
                }
            }
        }
        Ok(())
    }

    async fn pump_until<T>(&mut self, mut rx: tokio::sync::oneshot::Receiver<Result<T>>) -> Result<T> {
        loop {
            if let Ok(result) = rx.try_recv() {
                return result;
            }
            self.poll_one_response().await?;
        }
    }

    async fn read_one_message(&mut self) -> Result<Vec<u8>> {
        self.buffers.read_buffer_mut().clear();
        loop {
            let mut header = [0u8; 2];
            if let Err(err) = self.stream.read_exact(&mut header).await {
                return Err(self.fail_io(err));
            }
            let len = zerocopy::byteorder::big_endian::U16::ref_from_bytes(&header)
                .map_err(Error::from_debug)?
                .get() as usize;
            if len == 0 {
                return Ok(std::mem::take(self.buffers.read_buffer_mut()));
            }
            let start = self.buffers.read_buffer_mut().len();
            self.buffers.read_buffer_mut().resize(start + len, 0);
            let buffer = self.buffers.read_buffer_mut();
            if let Err(err) = self.stream.read_exact(&mut buffer[start..]).await {
                return Err(self.fail_io(err));
            }
        }
    }

    /// Send `RESET` alone, per the "flushes first, then sends RESET alone" rule (§4.3). On
    /// success the pipeline's sticky error clears and the state returns to `READY`.
    #[instrument(skip_all)]
    pub async fn reset(&mut self) -> Result<()> {
        self.flush().await?;
        self.request_and_await(Request::Reset, Transition::Reset).await?;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_broken(&self) -> bool {
        !self.state.is_usable()
    }

    /// Mark the connection DEFUNCT and poison every pending handler (§4.3). The
    /// poisoning error is a summary; the original `err` is still returned to the caller
    /// that triggered this.
    fn fail_io(&mut self, err: std::io::Error) -> Error {
        self.state = self.state.on_connection_error();
        self.pipeline.poison_all(Error::ProtocolError(err.to_string()));
        Error::IoError(err)
    }

    fn fail_protocol(&mut self, err: Error) -> Error {
        self.state = self.state.on_connection_error();
        self.pipeline.poison_all(Error::ProtocolError(err.to_string()));
        err
    }

    /// Issue the `DISCARD` a dropped, unexhausted cursor flagged via `mark_abandoned`, if
    /// one is owed. A no-op otherwise.
    async fn reclaim_pending_discard(&mut self) -> Result<()> {
        if self.pending_discard {
            self.pending_discard = false;
            PageSource::discard(self).await?;
        }
        Ok(())
    }
}

fn has_more_flag(fields: &Fields) -> bool {
    fields
        .iter()
        .find(|(k, _)| k == "has_more")
        .and_then(|(_, v)| v.as_bool())
        .unwrap_or(false)
}

/// Read `RUN`'s `SUCCESS` metadata for the `fields` list it promises (§4.5 step 1).
fn extract_field_names(metadata: &Fields) -> Result<Vec<String>> {
    let names = metadata.iter().find(|(k, _)| k == "fields").map(|(_, v)| v);
    match names {
        Some(Value::List(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::ProtocolError("RUN `fields` entry was not a string".into()))
            })
            .collect(),
        Some(other) => Err(Error::ProtocolError(format!(
            "RUN `fields` should be a list, got {other}"
        ))),
        None => Err(Error::ProtocolError("RUN SUCCESS missing `fields`".into())),
    }
}

fn extract_summary(metadata: Fields) -> Summary {
    let bookmark = metadata
        .iter()
        .find(|(k, _)| k == "bookmark")
        .and_then(|(_, v)| v.as_str())
        .map(str::to_string);
    Summary { metadata, bookmark }
}

/// Accumulates `RECORD`s for one `PULL`/`DISCARD` and resolves with the completed [`Page`]
/// on the terminal `SUCCESS`.
struct PageHandler {
    records: Vec<Vec<Value>>,
    reply: Option<tokio::sync::oneshot::Sender<Result<Page>>>,
}

impl ResponseHandler for PageHandler {
    fn on_record(&mut self, fields: Vec<Value>) {
        self.records.push(fields);
    }

    fn on_success(&mut self, metadata: Fields) {
        if let Some(tx) = self.reply.take() {
            let has_more = has_more_flag(&metadata);
            let records = std::mem::take(&mut self.records);
            let summary = if has_more { None } else { Some(extract_summary(metadata)) };
            let _ = tx.send(Ok(Page {
                records,
                has_more,
                summary,
            }));
        }
    }

    fn on_failure(&mut self, error: &Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

/// Same as [`PageHandler`] but for `DISCARD`, which never produces records and always
/// resolves to a summary.
struct DiscardHandler {
    reply: Option<tokio::sync::oneshot::Sender<Result<Summary>>>,
}

impl ResponseHandler for DiscardHandler {
    fn on_success(&mut self, metadata: Fields) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Ok(extract_summary(metadata)));
        }
    }

    fn on_failure(&mut self, error: &Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

#[async_trait::async_trait]
impl PageSource for BoltConnection {
    async fn pull(&mut self, n: i64) -> Result<Page> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(
            Request::Pull { n, qid: -1 },
            Box::new(PageHandler {
                records: Vec::new(),
                reply: Some(tx),
            }),
            Transition::PullOrDiscard,
        )
        .await?;
        self.flush().await?;
        self.pump_until(rx).await
    }

    async fn discard(&mut self) -> Result<Summary> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(
            Request::Discard { n: -1, qid: -1 },
            Box::new(DiscardHandler { reply: Some(tx) }),
            Transition::PullOrDiscard,
        )
        .await?;
        self.flush().await?;
        self.pump_until(rx).await
    }

    fn mark_abandoned(&mut self) {
        self.pending_discard = true;
    }
}

/// A one-shot handler that resolves a `oneshot` channel, used for handshake-time requests
/// that this module awaits synchronously relative to the connection's own event loop.
struct AwaitHandler {
    reply: Option<tokio::sync::oneshot::Sender<Result<Fields>>>,
}

impl ResponseHandler for AwaitHandler {
    fn on_success(&mut self, metadata: Fields) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Ok(metadata));
        }
    }

    fn on_failure(&mut self, error: &Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

#[async_trait::async_trait]
impl crate::pool::PooledConnection for BoltConnection {
    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn is_broken(&self) -> bool {
        BoltConnection::is_broken(self)
    }

    async fn probe(&mut self) -> Result<()> {
        self.reset().await
    }

    async fn reclaim(&mut self) -> Result<()> {
        self.reclaim_pending_discard().await
    }
}
