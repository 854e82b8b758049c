//! Per-stream state (§3, §4.3): the state machine, header aggregation
//! across HEADERS+CONTINUATION, and the flow-control windows gating
//! outbound DATA. Owned exclusively by the connection's stream table
//! (§9 "streams hold only a back-reference used exclusively for enqueue
//! / lookup and never for ownership"); nothing here touches the
//! transport directly — frames in and out cross through `Connection`.

use bytes::{Bytes, BytesMut};
use log::trace;
use tokio::sync::{mpsc, oneshot};

use crate::error::StreamError;
use crate::types::{HeaderList, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which header block (if any) is still being assembled across
/// HEADERS/PUSH_PROMISE + CONTINUATION frames (§3 "A CONTINUATION may
/// only follow HEADERS or PUSH_PROMISE... with no interleaving").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuing {
    Headers,
    PushPromise,
}

/// One in-flight header block's worth of inbound events delivered to
/// whatever is reading this stream (a `Request`/`Response` handle).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Headers(HeaderList),
    Data(Bytes),
    Reset(StreamError),
    Eof,
}

/// Per-stream state, created the moment either side emits the first
/// HEADERS bearing its id or a PUSH_PROMISE reserves it (§3
/// "Lifecycles"). `events_tx`/`events_rx` ferry inbound happenings to
/// whatever task is consuming this stream (`read_headers`/`read_data` in
/// spec terms); `data_tx` lets a caller push outbound body bytes without
/// blocking the connection's reader/writer tasks on application code.
pub struct Stream {
    pub id: StreamId,
    pub state: StreamState,
    pub priority: u32,
    continuing: Option<Continuing>,
    header_fragment: BytesMut,
    /// Outbound window: how many more DATA octets we may send before
    /// suspending on a WINDOW_UPDATE (§4.3 `send_data`).
    pub send_window: i64,
    /// Inbound window we have advertised to the peer for this stream.
    pub recv_window: i64,
    events_tx: mpsc::Sender<StreamEvent>,
    events_rx: Option<mpsc::Receiver<StreamEvent>>,
    send_window_waiters: Vec<oneshot::Sender<()>>,
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId, initial_send_window: i64, initial_recv_window: i64) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            id,
            state: StreamState::Idle,
            priority: crate::priority_queue::PriorityQueue::DEFAULT_PRIORITY,
            continuing: None,
            header_fragment: BytesMut::new(),
            send_window: initial_send_window,
            recv_window: initial_recv_window,
            events_tx,
            events_rx: Some(events_rx),
            send_window_waiters: Vec::new(),
        }
    }

    /// Detaches the receiving half so a `Request`/`Response` handle can
    /// own it. Only ever called once, right after the stream handle is
    /// created and handed to the caller.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.events_rx.take()
    }

    pub fn events_sender(&self) -> mpsc::Sender<StreamEvent> {
        self.events_tx.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// §4.3's state table, generalized to one entry point driven by the
    /// three booleans that matter (direction, end-of-headers, end-of-stream)
    /// rather than matching on frame variants directly.
    pub fn transition(
        &mut self,
        recv: bool,
        is_reset: bool,
        end_headers: bool,
        end_stream: bool,
        is_push_promise: bool,
    ) -> Result<(), StreamError> {
        let send = !recv;
        let before = self.state;

        if is_reset {
            if self.state == StreamState::Idle {
                return Err(StreamError::ProtocolViolation(
                    self.id,
                    "RST_STREAM on an idle stream".into(),
                ));
            }
            self.state = StreamState::Closed;
            trace!("stream {} {:?} -> {:?} (reset)", self.id, before, self.state);
            return Ok(());
        }

        match self.state {
            StreamState::Idle => {
                if is_push_promise {
                    self.state = if send {
                        StreamState::ReservedLocal
                    } else {
                        StreamState::ReservedRemote
                    };
                } else if end_headers {
                    self.state = StreamState::Open;
                    if end_stream {
                        self.state = if send {
                            StreamState::HalfClosedLocal
                        } else {
                            StreamState::HalfClosedRemote
                        };
                    }
                } else {
                    return Err(StreamError::ProtocolViolation(
                        self.id,
                        "non-HEADERS frame on an idle stream".into(),
                    ));
                }
            }
            StreamState::ReservedLocal if send && end_headers => {
                self.state = StreamState::HalfClosedRemote;
            }
            StreamState::ReservedRemote if recv && end_headers => {
                self.state = StreamState::HalfClosedLocal;
            }
            StreamState::Open => {
                if send && end_stream {
                    self.state = StreamState::HalfClosedLocal;
                } else if recv && end_stream {
                    self.state = StreamState::HalfClosedRemote;
                }
            }
            StreamState::HalfClosedRemote if send && end_stream => {
                self.state = StreamState::Closed;
            }
            StreamState::HalfClosedLocal if recv && end_stream => {
                self.state = StreamState::Closed;
            }
            StreamState::Closed => {
                return Err(StreamError::Closed(self.id));
            }
            _ => {}
        }

        if self.state != before {
            trace!("stream {} {:?} -> {:?}", self.id, before, self.state);
        }
        Ok(())
    }

    pub fn append_header_fragment(&mut self, bytes: &[u8]) {
        self.header_fragment.extend_from_slice(bytes);
    }

    pub fn take_header_fragment(&mut self) -> Bytes {
        self.header_fragment.split().freeze()
    }

    pub fn set_continuing(&mut self, c: Option<Continuing>) {
        self.continuing = c;
    }

    #[must_use]
    pub fn continuing(&self) -> Option<Continuing> {
        self.continuing
    }

    /// Applies a WINDOW_UPDATE's increment and wakes anyone suspended in
    /// `send_data` (§4.3 "WINDOW_UPDATE increments the outbound window
    /// and signals the outbound-window waiter").
    pub fn apply_window_update(&mut self, increment: u32) -> Result<(), StreamError> {
        self.send_window = self
            .send_window
            .checked_add(i64::from(increment))
            .ok_or_else(|| StreamError::ProtocolViolation(self.id, "stream window overflow".into()))?;
        for waiter in self.send_window_waiters.drain(..) {
            let _ = waiter.send(());
        }
        Ok(())
    }

    /// Registers interest in the window growing; `send_data` on the
    /// connection engine awaits the returned receiver when the window is
    /// currently insufficient.
    pub fn wait_for_window(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.send_window_waiters.push(tx);
        rx
    }

    pub async fn emit(&self, event: StreamEvent) {
        // The receiver only goes away once the caller drops its handle;
        // a send error there just means nobody is listening anymore.
        let _ = self.events_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_open_on_headers_without_end_stream() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.transition(false, false, true, false, false).unwrap();
        assert_eq!(s.state, StreamState::Open);
    }

    #[test]
    fn idle_to_half_closed_local_on_sent_end_stream_headers() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.transition(false, false, true, true, false).unwrap();
        assert_eq!(s.state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn push_promise_reserves_stream() {
        let mut s = Stream::new(2, 65_535, 65_535);
        s.transition(false, false, true, false, true).unwrap();
        assert_eq!(s.state, StreamState::ReservedLocal);
        s.transition(false, false, true, false, false).unwrap();
        assert_eq!(s.state, StreamState::HalfClosedRemote);
    }

    #[test]
    fn reset_from_idle_is_protocol_violation() {
        let mut s = Stream::new(1, 65_535, 65_535);
        assert!(s.transition(true, true, false, false, false).is_err());
    }

    #[test]
    fn half_closed_remote_to_closed_on_local_end_stream() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.transition(false, false, true, false, false).unwrap(); // -> Open
        s.transition(true, false, true, true, false).unwrap(); // recv END_STREAM -> HalfClosedRemote
        assert_eq!(s.state, StreamState::HalfClosedRemote);
        s.transition(false, false, true, true, false).unwrap(); // send END_STREAM -> Closed
        assert_eq!(s.state, StreamState::Closed);
    }

    #[test]
    fn any_frame_on_closed_stream_errors() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.state = StreamState::Closed;
        assert!(s.transition(true, false, true, false, false).is_err());
    }

    #[test]
    fn window_update_wakes_waiter() {
        let mut s = Stream::new(1, 0, 65_535);
        let mut rx = s.wait_for_window();
        s.apply_window_update(10).unwrap();
        assert_eq!(s.send_window, 10);
        assert!(rx.try_recv().is_ok());
    }
}
