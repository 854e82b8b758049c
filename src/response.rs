//! Inbound response/request body reading. Generalizes the teacher's
//! `Response` (`response.rs`, `{request_id, headers, body}` with a
//! `status()`/`header()` accessor pair) from a fully-buffered-at-once
//! struct into a handle over the stream's event channel, since this
//! crate's streams deliver DATA incrementally rather than all at once.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::{Http2Error, StreamError};
use crate::stream::StreamEvent;
use crate::types::{HeaderList, StreamId};

/// A response (client role) or an inbound request/trailcaptured via a
/// handler's stream (server role): the header block that opened the
/// stream, plus a handle for draining its body.
pub struct Response {
    pub stream_id: StreamId,
    pub headers: HeaderList,
    events: mpsc::Receiver<StreamEvent>,
    eof: bool,
}

impl Response {
    pub(crate) fn new(stream_id: StreamId, headers: HeaderList, events: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            stream_id,
            headers,
            events,
            eof: false,
        }
    }

    #[must_use]
    pub fn header(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// `:status` parsed as a number; panics if absent or malformed, since a
    /// HEADERS block with no `:status` is itself a protocol violation the
    /// connection engine should have already rejected.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.header(":status")
            .expect("response has no :status pseudo-header")
            .parse()
            .expect("non-numeric :status")
    }

    /// Drains the stream's body events into one contiguous buffer, up to
    /// end-of-stream or reset (§6 "Response.read_body() → bytes").
    pub async fn read_body(&mut self) -> Result<Bytes, Http2Error> {
        let mut buf = BytesMut::new();
        while !self.eof {
            match self.events.recv().await {
                Some(StreamEvent::Data(chunk)) => buf.extend_from_slice(&chunk),
                Some(StreamEvent::Eof) => self.eof = true,
                Some(StreamEvent::Reset(e)) => return Err(Http2Error::Stream(e)),
                Some(StreamEvent::Headers(_)) => {
                    // Trailers: this crate has no separate trailer slot
                    // (§3 has a single response-header map), so a second
                    // HEADERS block is folded in as more body-adjacent
                    // metadata is not representable here and is dropped.
                }
                None => {
                    return Err(Http2Error::Stream(StreamError::Closed(self.stream_id)));
                }
            }
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_body_concatenates_data_until_eof() {
        let (tx, rx) = mpsc::channel(4);
        let mut resp = Response::new(1, vec![(":status".to_owned(), "200".to_owned())], rx);
        tx.send(StreamEvent::Data(Bytes::from_static(b"hel"))).await.unwrap();
        tx.send(StreamEvent::Data(Bytes::from_static(b"lo"))).await.unwrap();
        tx.send(StreamEvent::Eof).await.unwrap();
        let body = resp.read_body().await.unwrap();
        assert_eq!(&body[..], b"hello");
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn reset_surfaces_as_error() {
        let (tx, rx) = mpsc::channel(4);
        let mut resp = Response::new(1, Vec::new(), rx);
        tx.send(StreamEvent::Reset(StreamError::Cancelled(1))).await.unwrap();
        assert!(resp.read_body().await.is_err());
    }
}
