//! Connection engine (§4.4): preface handshake, the reader task that
//! demultiplexes frames to streams or handles them at connection scope,
//! and the writer task that drains the priority queue under flow
//! control. Generalizes the teacher's `connection.rs` two-task split
//! (`spawn_request_sender` / `spawn_response_receiver`) from blocking
//! `std::thread` + `TcpStream` onto `tokio::spawn` over a caller-supplied
//! `AsyncRead + AsyncWrite`, per this crate's non-goal of never dialing a
//! socket itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, error, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Notify, RwLock};

use crate::config::{Config, SettingsMap};
use crate::error::{ConnectionError, Http2Error, StreamError};
use crate::frame::{Frame, FrameHeader, FRAME_HEADER_LEN};
use crate::hpack;
use crate::priority_queue::PriorityQueue;
use crate::stream::{Continuing, Stream, StreamEvent, StreamState};
use crate::stream_table::{Role, StreamTable};
use crate::types::{
    sort_pseudo_first, CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, ErrorType, HeaderList,
    SettingsParameter, StreamId,
};

/// Work items the writer task owns exclusively; everything that touches
/// the encoder or the outbound windows crosses into the writer only
/// through this channel (§5 "cross-task access is via the outbound
/// queue").
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame, u32),
    Headers {
        stream_id: StreamId,
        headers: HeaderList,
        end_stream: bool,
        priority: u32,
    },
    PushPromise {
        stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: HeaderList,
        priority: u32,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
        priority: u32,
    },
    ResizeEncoder(usize),
    /// A stream was reset or severed by GOAWAY: drop anything already
    /// queued for it and refuse anything queued afterward (§4.5, §8.5).
    TombstoneStream(StreamId),
}

/// A pushed stream handed to the client's on-push consumer (§6
/// "Connection callbacks: on-push (client)").
#[derive(Debug)]
pub struct PushedStream {
    pub stream_id: StreamId,
    pub request_headers: HeaderList,
}

pub(crate) struct Shared {
    pub role: Role,
    pub streams: StreamTable,
    pub config: Config,
    pub remote_settings: RwLock<SettingsMap>,
    pub conn_send_window: AtomicI64,
    pub conn_send_notify: Notify,
    pub conn_recv_window: AtomicI64,
    pub settings_ack_seen: AtomicBool,
    pub settings_acked_notify: Notify,
    pub closing: AtomicBool,
    pub last_peer_stream_id: AtomicU32,
    pub outbound_tx: mpsc::Sender<Outbound>,
    pub push_tx: mpsc::Sender<PushedStream>,
    pub incoming_tx: mpsc::Sender<StreamId>,
    pub goaway_tx: watch::Sender<Option<(StreamId, ErrorType)>>,
}

/// A live HTTP/2 connection over a caller-supplied transport. Holds no
/// socket of its own — `connect`/`accept` take ownership of `io` and
/// split it into a reader half and writer half driven by two background
/// tasks (§4.4, §9 "explicit task handles returned by the connection
/// constructor").
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
    push_rx: Option<mpsc::Receiver<PushedStream>>,
    incoming_rx: Option<mpsc::Receiver<StreamId>>,
    goaway_rx: watch::Receiver<Option<(StreamId, ErrorType)>>,
}

fn default_settings_map(config: &Config) -> SettingsMap {
    config.local_settings
}

impl Connection {
    async fn handshake<IO>(
        mut io: IO,
        role: Role,
        config: Config,
    ) -> Result<Self, Http2Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if role == Role::Server {
            let mut preface = [0u8; CONNECTION_PREFACE.len()];
            io.read_exact(&mut preface).await?;
            if &preface != CONNECTION_PREFACE {
                return Err(Http2Error::Connection(ConnectionError::protocol(
                    "client preface mismatch",
                )));
            }
        } else {
            io.write_all(CONNECTION_PREFACE).await?;
        }

        let local_settings_frame = Frame::Settings {
            ack: false,
            params: config
                .local_settings
                .iter()
                .map(|(k, v)| (k, *v))
                .collect(),
        };
        let mut out = BytesMut::new();
        local_settings_frame
            .serialize(&mut out)
            .map_err(Http2Error::Connection)?;
        io.write_all(&out).await?;

        let (read_half, write_half) = tokio::io::split(io);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let (push_tx, push_rx) = mpsc::channel(32);
        let (incoming_tx, incoming_rx) = mpsc::channel(32);
        let (goaway_tx, goaway_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            role,
            streams: StreamTable::new(role),
            remote_settings: RwLock::new(default_settings_map(&config)),
            conn_send_window: AtomicI64::new(i64::from(DEFAULT_INITIAL_WINDOW_SIZE)),
            conn_send_notify: Notify::new(),
            conn_recv_window: AtomicI64::new(i64::from(DEFAULT_INITIAL_WINDOW_SIZE)),
            settings_ack_seen: AtomicBool::new(false),
            settings_acked_notify: Notify::new(),
            closing: AtomicBool::new(false),
            last_peer_stream_id: AtomicU32::new(0),
            outbound_tx,
            push_tx,
            incoming_tx,
            goaway_tx,
            config,
        });

        let reader_task = tokio::spawn(reader_loop(read_half, shared.clone()));
        let writer_task = tokio::spawn(writer_loop(write_half, shared.clone(), outbound_rx));

        let ack_timeout = shared.config.settings_ack_timeout;
        if tokio::time::timeout(ack_timeout, shared.settings_acked_notify.notified())
            .await
            .is_err()
            && !shared.settings_ack_seen.load(Ordering::SeqCst)
        {
            reader_task.abort();
            writer_task.abort();
            return Err(Http2Error::Connection(ConnectionError::SettingsTimeout));
        }

        Ok(Self {
            shared,
            reader_task,
            writer_task,
            push_rx: Some(push_rx),
            incoming_rx: Some(incoming_rx),
            goaway_rx,
        })
    }

    /// Client-side handshake (§4.4 "Preface"): write the preface + our
    /// SETTINGS, then spawn reader/writer and wait for the peer's ACK.
    pub async fn connect<IO>(io: IO, config: Config) -> Result<Self, Http2Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::handshake(io, Role::Client, config).await
    }

    /// Server-side handshake: read and validate the client preface, then
    /// proceed exactly as `connect` does.
    pub async fn accept<IO>(io: IO, config: Config) -> Result<Self, Http2Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::handshake(io, Role::Server, config).await
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Receiver for peer-initiated streams whose request headers have
    /// just completed (server's accept loop, or client's response to its
    /// own pushed-stream bookkeeping).
    pub fn incoming(&mut self) -> Option<mpsc::Receiver<StreamId>> {
        self.incoming_rx.take()
    }

    /// Receiver for server pushes (§6 "on-push (client)").
    pub fn pushes(&mut self) -> Option<mpsc::Receiver<PushedStream>> {
        self.push_rx.take()
    }

    /// Resolves once the peer sends GOAWAY (§6 "on-goaway").
    pub async fn on_goaway(&mut self) -> Option<(StreamId, ErrorType)> {
        self.goaway_rx.changed().await.ok()?;
        self.goaway_rx.borrow().clone()
    }

    pub(crate) async fn new_local_stream(&self, initial_priority: u32) -> Result<StreamId, ConnectionError> {
        let id = self.shared.streams.next_local_id()?;
        let send_window = i64::from(
            self.shared.remote_settings.read().await[SettingsParameter::InitialWindowSize],
        );
        let recv_window = i64::from(self.shared.config.initial_window_size());
        let mut stream = Stream::new(id, send_window, recv_window);
        stream.priority = initial_priority;
        self.shared.streams.insert(stream);
        Ok(id)
    }

    pub(crate) fn take_stream_events(&self, id: StreamId) -> Option<mpsc::Receiver<StreamEvent>> {
        self.shared.streams.with_stream(id, Stream::take_events).flatten()
    }

    pub(crate) async fn send_headers(
        &self,
        stream_id: StreamId,
        headers: HeaderList,
        end_stream: bool,
        priority: u32,
    ) -> Result<(), Http2Error> {
        self.shared
            .outbound_tx
            .send(Outbound::Headers {
                stream_id,
                headers,
                end_stream,
                priority,
            })
            .await
            .map_err(|_| Http2Error::Closed)
    }

    pub(crate) async fn send_data(
        &self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
        priority: u32,
    ) -> Result<(), Http2Error> {
        self.shared
            .outbound_tx
            .send(Outbound::Data {
                stream_id,
                data,
                end_stream,
                priority,
            })
            .await
            .map_err(|_| Http2Error::Closed)
    }

    pub(crate) async fn push(
        &self,
        stream_id: StreamId,
        headers: HeaderList,
        priority: u32,
    ) -> Result<StreamId, Http2Error> {
        let promised_id = self
            .new_local_stream(priority)
            .await
            .map_err(Http2Error::Connection)?;
        self.shared.streams.with_stream(promised_id, |s| {
            let _ = s.transition(false, false, true, false, true);
        });
        self.shared
            .outbound_tx
            .send(Outbound::PushPromise {
                stream_id,
                promised_stream_id: promised_id,
                headers,
                priority,
            })
            .await
            .map_err(|_| Http2Error::Closed)?;
        Ok(promised_id)
    }

    /// Blocks until both background tasks have exited (normal close or
    /// connection-fatal error).
    pub async fn closed(self) {
        let _ = self.reader_task.await;
        let _ = self.writer_task.await;
    }
}

async fn read_frame_header<R: AsyncRead + Unpin>(io: &mut R) -> std::io::Result<Option<FrameHeader>> {
    let mut buf = [0u8; FRAME_HEADER_LEN];
    match io.read_exact(&mut buf).await {
        Ok(_) => Ok(Some(FrameHeader::parse(buf))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

async fn send_goaway(shared: &Shared, err: &ConnectionError) {
    error!("connection error, sending GOAWAY: {err}");
    shared.closing.store(true, Ordering::SeqCst);
    let last = shared.last_peer_stream_id.load(Ordering::SeqCst);
    let _ = shared
        .outbound_tx
        .send(Outbound::Frame(
            Frame::GoAway {
                last_stream_id: last,
                error: err.wire_code(),
                debug_data: Bytes::from(err.to_string().into_bytes()),
            },
            0,
        ))
        .await;
}

async fn reset_stream(shared: &Shared, err: StreamError) {
    let id = err.stream_id();
    warn!("resetting stream {id}: {err}");
    let sender = shared.streams.with_stream(id, |s| {
        s.state = StreamState::Closed;
        s.events_sender()
    });
    if let Some(sender) = sender {
        let _ = sender.send(StreamEvent::Reset(err.clone())).await;
    }
    let _ = shared.outbound_tx.send(Outbound::TombstoneStream(id)).await;
    let _ = shared
        .outbound_tx
        .send(Outbound::Frame(
            Frame::ResetStream {
                stream_id: id,
                error: err.wire_code(),
            },
            0,
        ))
        .await;
}

async fn reader_loop<R: AsyncRead + Unpin>(mut io: R, shared: Arc<Shared>) {
    let mut decoder = hpack::Decoder::with_max_size(shared.config.header_table_size() as usize);

    loop {
        let header = match read_frame_header(&mut io).await {
            Ok(Some(h)) => h,
            Ok(None) => {
                debug!("peer closed the transport");
                break;
            }
            Err(e) => {
                error!("transport read error: {e}");
                break;
            }
        };

        let mut payload = vec![0u8; header.length as usize];
        if let Err(e) = io.read_exact(&mut payload).await {
            error!("transport read error reading payload: {e}");
            break;
        }

        let frame = match Frame::parse_payload(&header, Bytes::from(payload)) {
            Ok(f) => f,
            Err(e) => {
                send_goaway(&shared, &e).await;
                break;
            }
        };

        trace!("recv {:?}", frame.frame_type());

        match dispatch(&shared, &mut decoder, frame).await {
            Ok(()) => {}
            Err(DispatchError::Connection(e)) => {
                send_goaway(&shared, &e).await;
                break;
            }
            Err(DispatchError::Stream(e)) => {
                reset_stream(&shared, e).await;
            }
        }

        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
    }
}

#[derive(Debug)]
enum DispatchError {
    Connection(ConnectionError),
    Stream(StreamError),
}

impl From<ConnectionError> for DispatchError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}
impl From<StreamError> for DispatchError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

async fn apply_settings(shared: &Shared, params: &[(SettingsParameter, u32)]) -> Result<(), ConnectionError> {
    let mut remote = shared.remote_settings.write().await;
    for &(param, value) in params {
        if param == SettingsParameter::InitialWindowSize {
            let old = remote[param];
            let delta = i64::from(value) - i64::from(old);
            for id in shared.streams.open_ids() {
                shared.streams.with_stream(id, |s| {
                    s.send_window = s.send_window.saturating_add(delta);
                });
            }
        }
        if param == SettingsParameter::HeaderTableSize {
            let _ = shared
                .outbound_tx
                .send(Outbound::ResizeEncoder(value as usize))
                .await;
        }
        remote[param] = value;
    }
    Ok(())
}

async fn dispatch(
    shared: &Arc<Shared>,
    decoder: &mut hpack::Decoder,
    frame: Frame,
) -> Result<(), DispatchError> {
    let stream_id = frame.stream_id();

    if stream_id == 0 {
        return dispatch_connection_frame(shared, decoder, frame).await;
    }

    if !shared.streams.contains(stream_id) {
        if shared.streams.is_peer_initiated(stream_id) {
            if matches!(frame, Frame::Headers { .. }) {
                let send_window =
                    i64::from(shared.remote_settings.read().await[SettingsParameter::InitialWindowSize]);
                let recv_window = i64::from(shared.config.initial_window_size());
                shared
                    .streams
                    .insert(Stream::new(stream_id, send_window, recv_window));
                shared
                    .last_peer_stream_id
                    .fetch_max(stream_id, Ordering::SeqCst);
            } else if !matches!(frame, Frame::PushPromise { .. } | Frame::Priority { .. } | Frame::WindowUpdate { .. }) {
                return Err(ConnectionError::protocol(format!(
                    "frame {:?} for unknown stream {stream_id}",
                    frame.frame_type()
                ))
                .into());
            }
        } else {
            return Err(ConnectionError::protocol(format!(
                "frame {:?} for a locally-numbered stream we never opened",
                frame.frame_type()
            ))
            .into());
        }
    }

    dispatch_stream_frame(shared, decoder, stream_id, frame).await
}

async fn dispatch_connection_frame(
    shared: &Arc<Shared>,
    _decoder: &mut hpack::Decoder,
    frame: Frame,
) -> Result<(), DispatchError> {
    match frame {
        Frame::Settings { ack, params } => {
            if ack {
                shared.settings_ack_seen.store(true, Ordering::SeqCst);
                shared.settings_acked_notify.notify_waiters();
                return Ok(());
            }
            apply_settings(shared, &params).await?;
            let _ = shared
                .outbound_tx
                .send(Outbound::Frame(
                    Frame::Settings {
                        ack: true,
                        params: Vec::new(),
                    },
                    0,
                ))
                .await;
            shared.settings_acked_notify.notify_waiters();
            Ok(())
        }
        Frame::Ping { ack, data } => {
            if !ack {
                let _ = shared
                    .outbound_tx
                    .send(Outbound::Frame(Frame::Ping { ack: true, data }, 0))
                    .await;
            }
            Ok(())
        }
        Frame::WindowUpdate { increment, .. } => {
            if increment == 0 {
                return Err(ConnectionError::FlowControl(
                    "WINDOW_UPDATE increment of 0 at connection scope".into(),
                )
                .into());
            }
            shared
                .conn_send_window
                .fetch_add(i64::from(increment), Ordering::SeqCst);
            shared.conn_send_notify.notify_waiters();
            Ok(())
        }
        Frame::GoAway {
            last_stream_id,
            error,
            ..
        } => {
            shared.closing.store(true, Ordering::SeqCst);
            let _ = shared.goaway_tx.send(Some((last_stream_id, error)));
            for id in shared.streams.open_ids() {
                if id > last_stream_id {
                    let sender = shared.streams.with_stream(id, |s| {
                        s.state = StreamState::Closed;
                        s.events_sender()
                    });
                    if let Some(sender) = sender {
                        let _ = sender.send(StreamEvent::Reset(StreamError::Refused(id))).await;
                    }
                    let _ = shared.outbound_tx.send(Outbound::TombstoneStream(id)).await;
                }
            }
            Ok(())
        }
        other => Err(ConnectionError::protocol(format!(
            "frame type {:?} not valid at stream 0",
            other.frame_type()
        ))
        .into()),
    }
}

async fn dispatch_stream_frame(
    shared: &Arc<Shared>,
    decoder: &mut hpack::Decoder,
    stream_id: StreamId,
    frame: Frame,
) -> Result<(), DispatchError> {
    match frame {
        Frame::Priority { priority, .. } => {
            shared.streams.with_stream(stream_id, |s| s.priority = priority);
            Ok(())
        }
        Frame::ResetStream { error, .. } => {
            let mapped = match error {
                ErrorType::Cancel => StreamError::Cancelled(stream_id),
                ErrorType::RefusedStream => StreamError::Refused(stream_id),
                _ => StreamError::ProtocolViolation(stream_id, format!("RST_STREAM {error:?}")),
            };
            let transitioned = shared
                .streams
                .with_stream(stream_id, |s| s.transition(true, true, false, false, false));
            if !matches!(transitioned, Some(Ok(()))) {
                return Err(StreamError::ProtocolViolation(stream_id, "RST_STREAM on idle stream".into()).into());
            }
            let sender = shared.streams.with_stream(stream_id, |s| s.events_sender());
            if let Some(sender) = sender {
                let _ = sender.send(StreamEvent::Reset(mapped)).await;
            }
            let _ = shared.outbound_tx.send(Outbound::TombstoneStream(stream_id)).await;
            Ok(())
        }
        Frame::WindowUpdate { increment, .. } => {
            if increment == 0 {
                return Err(StreamError::ProtocolViolation(stream_id, "WINDOW_UPDATE increment of 0".into()).into());
            }
            let result = shared
                .streams
                .with_stream(stream_id, |s| s.apply_window_update(increment));
            match result {
                Some(Ok(())) | None => Ok(()),
                Some(Err(e)) => Err(e.into()),
            }
        }
        Frame::Headers {
            end_stream,
            end_headers,
            fragment,
            ..
        } => {
            shared.streams.with_stream(stream_id, |s| s.append_header_fragment(&fragment));
            if end_headers {
                finish_headers(shared, decoder, stream_id, end_stream, false).await
            } else {
                shared
                    .streams
                    .with_stream(stream_id, |s| s.set_continuing(Some(Continuing::Headers)));
                Ok(())
            }
        }
        Frame::PushPromise {
            promised_stream_id,
            end_headers,
            fragment,
            ..
        } => {
            let send_window =
                i64::from(shared.remote_settings.read().await[SettingsParameter::InitialWindowSize]);
            let recv_window = i64::from(shared.config.initial_window_size());
            shared
                .streams
                .insert(Stream::new(promised_stream_id, send_window, recv_window));
            shared.streams.with_stream(promised_stream_id, |s| {
                let _ = s.transition(true, false, true, false, true);
                s.append_header_fragment(&fragment);
            });
            if end_headers {
                finish_headers(shared, decoder, promised_stream_id, false, true).await
            } else {
                shared
                    .streams
                    .with_stream(promised_stream_id, |s| s.set_continuing(Some(Continuing::PushPromise)));
                Ok(())
            }
        }
        Frame::Continuation {
            end_headers,
            fragment,
            ..
        } => {
            let continuing = shared.streams.with_stream(stream_id, |s| s.continuing()).flatten();
            if continuing.is_none() {
                return Err(ConnectionError::protocol(
                    "CONTINUATION without a preceding HEADERS/PUSH_PROMISE",
                )
                .into());
            }
            shared.streams.with_stream(stream_id, |s| s.append_header_fragment(&fragment));
            if end_headers {
                let was_push = continuing == Some(Continuing::PushPromise);
                shared.streams.with_stream(stream_id, |s| s.set_continuing(None));
                let end_stream = shared
                    .streams
                    .with_stream(stream_id, |s| s.state == StreamState::HalfClosedRemote)
                    .unwrap_or(false);
                finish_headers(shared, decoder, stream_id, end_stream, was_push).await
            } else {
                Ok(())
            }
        }
        Frame::Data { end_stream, data, .. } => {
            if shared
                .streams
                .with_stream(stream_id, |s| s.continuing().is_some())
                .unwrap_or(false)
            {
                return Err(ConnectionError::protocol("DATA interleaved within a header block").into());
            }
            let len = data.len();
            let result = shared.streams.with_stream(stream_id, |s| {
                s.transition(true, false, true, end_stream, false)
            });
            if let Some(Err(e)) = result {
                return Err(e.into());
            }
            let sender = shared.streams.with_stream(stream_id, |s| s.events_sender());
            if let Some(sender) = sender {
                let _ = sender.send(StreamEvent::Data(data)).await;
                if end_stream {
                    let _ = sender.send(StreamEvent::Eof).await;
                }
            }
            // §4.3 "on each received DATA it triggers an incoming WINDOW_UPDATE
            // of the same size... so the peer can keep sending".
            if len > 0 {
                let _ = shared
                    .outbound_tx
                    .send(Outbound::Frame(
                        Frame::WindowUpdate {
                            stream_id,
                            increment: len as u32,
                        },
                        0,
                    ))
                    .await;
                let _ = shared
                    .outbound_tx
                    .send(Outbound::Frame(
                        Frame::WindowUpdate {
                            stream_id: 0,
                            increment: len as u32,
                        },
                        0,
                    ))
                    .await;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn finish_headers(
    shared: &Arc<Shared>,
    decoder: &mut hpack::Decoder,
    stream_id: StreamId,
    end_stream: bool,
    is_push_promise: bool,
) -> Result<(), DispatchError> {
    let fragment = shared
        .streams
        .with_stream(stream_id, Stream::take_header_fragment)
        .unwrap_or_default();
    let mut headers = decoder
        .decode(&fragment)
        .map_err(|e| ConnectionError::Compression(e.to_string()))?;
    sort_pseudo_first(&mut headers);

    let is_new_stream_announce = shared
        .streams
        .with_stream(stream_id, |s| s.state == StreamState::Idle)
        .unwrap_or(false);

    let transition_result = shared
        .streams
        .with_stream(stream_id, |s| s.transition(true, false, true, end_stream, is_push_promise));
    if let Some(Err(e)) = transition_result {
        return Err(e.into());
    }

    if is_push_promise {
        let _ = shared
            .push_tx
            .send(PushedStream {
                stream_id,
                request_headers: headers,
            })
            .await;
        return Ok(());
    }

    let sender = shared.streams.with_stream(stream_id, |s| s.events_sender());
    if let Some(sender) = sender {
        let _ = sender.send(StreamEvent::Headers(headers)).await;
        if end_stream {
            let _ = sender.send(StreamEvent::Eof).await;
        }
    }

    if is_new_stream_announce && shared.streams.is_peer_initiated(stream_id) {
        let _ = shared.incoming_tx.send(stream_id).await;
    }

    Ok(())
}

struct PendingData {
    stream_id: StreamId,
    data: Bytes,
    end_stream: bool,
    priority: u32,
}

async fn writer_loop<W: AsyncWrite + Unpin>(
    mut io: W,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    let mut queue = PriorityQueue::new();
    let mut encoder = hpack::Encoder::with_max_size(shared.config.header_table_size() as usize);
    let mut pending_data: VecDeque<PendingData> = VecDeque::new();
    let mut out = BytesMut::new();

    loop {
        while let Ok(msg) = rx.try_recv() {
            handle_outbound(msg, &mut queue, &mut encoder, &shared, &mut pending_data).await;
        }

        if let Some(frame) = queue.pop() {
            if !write_frame(&mut io, &mut out, frame).await {
                break;
            }
            continue;
        }

        if let Some(front) = pending_data.front_mut() {
            if front.data.is_empty() {
                let done = pending_data.pop_front().unwrap();
                if done.end_stream {
                    let frame = Frame::Data {
                        stream_id: done.stream_id,
                        end_stream: true,
                        padding: crate::frame::Padding::none(),
                        data: Bytes::new(),
                    };
                    if !write_frame(&mut io, &mut out, frame).await {
                        break;
                    }
                }
                continue;
            }

            let max_frame = shared.config.max_frame_size as usize;
            let stream_window = shared
                .streams
                .with_stream(front.stream_id, |s| s.send_window)
                .unwrap_or(0);
            let conn_window = shared.conn_send_window.load(Ordering::SeqCst);
            let allowed = max_frame.min(stream_window.max(0) as usize).min(conn_window.max(0) as usize);

            if allowed == 0 {
                let stream_wait = shared
                    .streams
                    .with_stream(front.stream_id, Stream::wait_for_window);
                match stream_wait {
                    Some(waiter) => {
                        tokio::select! {
                            _ = waiter => {},
                            () = shared.conn_send_notify.notified() => {},
                            msg = rx.recv() => {
                                match msg {
                                    Some(m) => handle_outbound(m, &mut queue, &mut encoder, &shared, &mut pending_data).await,
                                    None => break,
                                }
                            }
                        }
                    }
                    None => {
                        pending_data.pop_front();
                    }
                }
                continue;
            }

            let chunk = front.data.split_to(allowed.min(front.data.len()));
            let chunk_len = chunk.len() as u32;
            shared.streams.with_stream(front.stream_id, |s| {
                s.send_window -= i64::from(chunk_len);
            });
            shared
                .conn_send_window
                .fetch_sub(i64::from(chunk_len), Ordering::SeqCst);

            let is_last = front.data.is_empty();
            let frame = Frame::Data {
                stream_id: front.stream_id,
                end_stream: is_last && front.end_stream,
                padding: crate::frame::Padding::none(),
                data: chunk,
            };
            if is_last {
                let done = pending_data.pop_front().unwrap();
                shared.streams.with_stream(done.stream_id, |s| {
                    let _ = s.transition(false, false, true, done.end_stream, false);
                });
            }
            if !write_frame(&mut io, &mut out, frame).await {
                break;
            }
            continue;
        }

        match rx.recv().await {
            Some(msg) => handle_outbound(msg, &mut queue, &mut encoder, &shared, &mut pending_data).await,
            None => break,
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(io: &mut W, out: &mut BytesMut, frame: Frame) -> bool {
    out.clear();
    if let Err(e) = frame.serialize(out) {
        error!("failed to serialize outbound frame: {e}");
        return true;
    }
    trace!("send {:?}", frame.frame_type());
    if let Err(e) = io.write_all(out).await {
        error!("transport write error: {e}");
        return false;
    }
    true
}

async fn handle_outbound(
    msg: Outbound,
    queue: &mut PriorityQueue,
    encoder: &mut hpack::Encoder,
    shared: &Arc<Shared>,
    pending_data: &mut VecDeque<PendingData>,
) {
    match msg {
        Outbound::Frame(frame, priority) => queue.push(frame, priority),
        Outbound::ResizeEncoder(size) => encoder.set_max_size(size),
        Outbound::TombstoneStream(stream_id) => {
            queue.tombstone(stream_id);
            pending_data.retain(|p| p.stream_id != stream_id);
        }
        Outbound::Headers {
            stream_id,
            headers,
            end_stream,
            priority,
        } => {
            enqueue_header_block(queue, encoder, shared, stream_id, headers, end_stream, priority, None).await;
        }
        Outbound::PushPromise {
            stream_id,
            promised_stream_id,
            headers,
            priority,
        } => {
            enqueue_header_block(
                queue,
                encoder,
                shared,
                stream_id,
                headers,
                false,
                priority,
                Some(promised_stream_id),
            )
            .await;
        }
        Outbound::Data {
            stream_id,
            data,
            end_stream,
            priority,
        } => {
            if data.is_empty() && !end_stream {
                return;
            }
            pending_data.push_back(PendingData {
                stream_id,
                data,
                end_stream,
                priority,
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn enqueue_header_block(
    queue: &mut PriorityQueue,
    encoder: &mut hpack::Encoder,
    shared: &Arc<Shared>,
    stream_id: StreamId,
    headers: HeaderList,
    end_stream: bool,
    priority: u32,
    promised_stream_id: Option<StreamId>,
) {
    let mut ordered = headers;
    sort_pseudo_first(&mut ordered);
    debug_assert!(ordered.iter().all(|(name, _)| !name.is_empty()));
    let block = encoder.encode(&ordered);
    let max_frame = shared.config.max_frame_size as usize;
    let chunks: Vec<Bytes> = if block.is_empty() {
        vec![Bytes::new()]
    } else {
        block
            .chunks(max_frame.max(1))
            .map(|c| Bytes::copy_from_slice(c))
            .collect()
    };
    let last = chunks.len() - 1;

    for (i, chunk) in chunks.into_iter().enumerate() {
        let end_headers = i == last;
        let frame = if i == 0 {
            match promised_stream_id {
                Some(promised) => Frame::PushPromise {
                    stream_id,
                    promised_stream_id: promised,
                    end_headers,
                    padding: crate::frame::Padding::none(),
                    fragment: chunk,
                },
                None => Frame::Headers {
                    stream_id,
                    end_stream,
                    end_headers,
                    priority: None,
                    padding: crate::frame::Padding::none(),
                    fragment: chunk,
                },
            }
        } else {
            Frame::Continuation {
                stream_id,
                end_headers,
                padding: crate::frame::Padding::none(),
                fragment: chunk,
            }
        };
        queue.push(frame, priority);
    }

    let target = promised_stream_id.unwrap_or(stream_id);
    shared.streams.with_stream(target, |s| {
        let _ = s.transition(false, false, true, end_stream, false);
    });
}

/// Wire-level round trips for these scenarios live in `tests/`; HPACK is
/// private to this crate, so anything that needs a real header block
/// (opening a stream, mid-stream RST_STREAM) is exercised here instead,
/// directly against the dispatch/writer plumbing those scenarios rely on.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    fn make_shared(role: Role) -> (Arc<Shared>, mpsc::Receiver<Outbound>) {
        let config = Config::default();
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (push_tx, _push_rx) = mpsc::channel(8);
        let (incoming_tx, _incoming_rx) = mpsc::channel(8);
        let (goaway_tx, _goaway_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            streams: StreamTable::new(role),
            remote_settings: RwLock::new(default_settings_map(&config)),
            conn_send_window: AtomicI64::new(i64::from(DEFAULT_INITIAL_WINDOW_SIZE)),
            conn_send_notify: Notify::new(),
            conn_recv_window: AtomicI64::new(i64::from(DEFAULT_INITIAL_WINDOW_SIZE)),
            settings_ack_seen: AtomicBool::new(false),
            settings_acked_notify: Notify::new(),
            closing: AtomicBool::new(false),
            last_peer_stream_id: AtomicU32::new(0),
            outbound_tx,
            push_tx,
            incoming_tx,
            goaway_tx,
            role,
            config,
        });
        (shared, outbound_rx)
    }

    /// §8.5: once a stream is torn down, neither its already-queued nor
    /// its future pending DATA should ever reach the transport.
    #[tokio::test]
    async fn tombstoning_a_stream_drops_already_queued_and_future_data() {
        let (shared, _outbound_rx) = make_shared(Role::Server);
        let mut queue = PriorityQueue::new();
        let mut encoder = hpack::Encoder::with_max_size(4096);
        let mut pending_data: VecDeque<PendingData> = VecDeque::new();

        handle_outbound(
            Outbound::Data {
                stream_id: 3,
                data: Bytes::from_static(b"hello"),
                end_stream: false,
                priority: 0,
            },
            &mut queue,
            &mut encoder,
            &shared,
            &mut pending_data,
        )
        .await;
        assert_eq!(pending_data.len(), 1);

        handle_outbound(
            Outbound::TombstoneStream(3),
            &mut queue,
            &mut encoder,
            &shared,
            &mut pending_data,
        )
        .await;
        assert!(pending_data.is_empty());

        handle_outbound(
            Outbound::Frame(Frame::Ping { ack: false, data: [9; 8] }, PriorityQueue::DEFAULT_PRIORITY),
            &mut queue,
            &mut encoder,
            &shared,
            &mut pending_data,
        )
        .await;
        handle_outbound(
            Outbound::Data {
                stream_id: 3,
                data: Bytes::from_static(b"late"),
                end_stream: false,
                priority: 0,
            },
            &mut queue,
            &mut encoder,
            &shared,
            &mut pending_data,
        )
        .await;

        assert!(
            pending_data.is_empty(),
            "a tombstoned stream must never get new pending DATA either"
        );
        assert_eq!(queue.pop(), Some(Frame::Ping { ack: false, data: [9; 8] }));
        assert!(queue.pop().is_none());
    }

    /// §8.6: GOAWAY severs every stream above `last_stream_id` as
    /// `StreamError::Refused` and leaves streams at or below it alone.
    #[tokio::test]
    async fn goaway_refuses_streams_above_last_stream_id_and_leaves_others_alone() {
        let (shared, mut outbound_rx) = make_shared(Role::Client);
        shared.streams.insert(Stream::new(7, 65_535, 65_535));
        shared.streams.insert(Stream::new(9, 65_535, 65_535));
        let mut events_9 = shared
            .streams
            .with_stream(9, Stream::take_events)
            .flatten()
            .expect("stream 9 should have an events channel");

        let mut decoder = hpack::Decoder::with_max_size(4096);
        dispatch_connection_frame(
            &shared,
            &mut decoder,
            Frame::GoAway {
                last_stream_id: 7,
                error: ErrorType::NoError,
                debug_data: Bytes::new(),
            },
        )
        .await
        .unwrap();

        assert_ne!(shared.streams.with_stream(7, |s| s.state), Some(StreamState::Closed));
        assert_eq!(shared.streams.with_stream(9, |s| s.state), Some(StreamState::Closed));

        match events_9.recv().await {
            Some(StreamEvent::Reset(StreamError::Refused(id))) => assert_eq!(id, 9),
            other => panic!("expected Reset(Refused(9)), got {other:?}"),
        }
        assert!(matches!(outbound_rx.recv().await, Some(Outbound::TombstoneStream(9))));
    }
}
