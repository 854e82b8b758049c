//! Client-role request issuing (§6 "`connect(authority, settings) →
//! Connection`; `Connection.request(...) → Response`"). Generalizes the
//! teacher's `Client` (`client.rs`, which dials a `Url` over rustls) into
//! a method on the already-connected [`Connection`] — dialing and TLS are
//! the caller's job here, not this crate's.

use crate::connection::{Connection, PushedStream};
use crate::error::Http2Error;
use crate::priority_queue::PriorityQueue;
use crate::request::Request;
use crate::response::Response;
use crate::stream::StreamEvent;

impl Connection {
    /// Adopts a pushed stream surfaced via [`Connection::pushes`] into a
    /// `Response` handle: waits for the pushed stream's own response
    /// HEADERS, the same way `request` waits for its own (§6 "on-push
    /// (client)" — "client's on-push callback receives stream 2 and can
    /// read its body independently of stream 1").
    pub async fn adopt_push(&self, pushed: PushedStream) -> Result<Response, Http2Error> {
        let mut events = self
            .take_stream_events(pushed.stream_id)
            .ok_or(Http2Error::Closed)?;
        loop {
            match events.recv().await {
                Some(StreamEvent::Headers(h)) => return Ok(Response::new(pushed.stream_id, h, events)),
                Some(StreamEvent::Reset(e)) => return Err(Http2Error::Stream(e)),
                Some(StreamEvent::Data(_) | StreamEvent::Eof) => {}
                None => return Err(Http2Error::Closed),
            }
        }
    }

    /// Opens a new client-initiated stream, sends the request's headers
    /// (and body, if any), and waits for the response's HEADERS block
    /// (§6 "Simple GET" scenario).
    pub async fn request(&self, request: Request) -> Result<Response, Http2Error> {
        let stream_id = self
            .new_local_stream(PriorityQueue::DEFAULT_PRIORITY)
            .await
            .map_err(Http2Error::Connection)?;
        let mut events = self
            .take_stream_events(stream_id)
            .ok_or(Http2Error::Closed)?;

        let (headers, body) = request.into_header_list();
        let end_stream = body.is_empty();
        self.send_headers(stream_id, headers, end_stream, PriorityQueue::DEFAULT_PRIORITY)
            .await?;
        if !end_stream {
            self.send_data(stream_id, body, true, PriorityQueue::DEFAULT_PRIORITY)
                .await?;
        }

        loop {
            match events.recv().await {
                Some(StreamEvent::Headers(h)) => return Ok(Response::new(stream_id, h, events)),
                Some(StreamEvent::Reset(e)) => return Err(Http2Error::Stream(e)),
                Some(StreamEvent::Data(_) | StreamEvent::Eof) => {
                    // A well-behaved peer sends HEADERS before any DATA;
                    // tolerate and skip anything that arrives first.
                }
                None => return Err(Http2Error::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::request::Request;

    #[test]
    fn request_builds_expected_pseudo_headers() {
        let req = Request::get("/index.html", vec![(":authority".to_owned(), "example.com".to_owned())]);
        let (headers, _) = req.into_header_list();
        assert_eq!(headers[0].0, ":method");
        assert_eq!(headers[1].0, ":path");
    }
}
