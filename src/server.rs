//! Server-role request dispatch (§6 "`serve(handler, settings,
//! bind_addr)`; handler receives `(request_headers, response, context)`").
//! This crate never binds a socket (no `tokio::net` dependency, and
//! spec.md §1 places TCP transport itself out of scope), so `serve` takes
//! an already-`Connection::accept`-ed connection rather than a bind
//! address — the caller dials and accepts the transport, this crate only
//! speaks the protocol once bytes are flowing.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use log::{trace, warn};

use crate::connection::Connection;
use crate::error::Http2Error;
use crate::priority_queue::PriorityQueue;
use crate::stream::StreamEvent;
use crate::types::{HeaderList, StreamId};

/// Handed to a request handler so it can answer on the stream that
/// carried the request, or push an associated resource on a fresh one
/// (§4.3 "Push-promise coordination").
#[derive(Clone)]
pub struct ResponseWriter {
    connection: Arc<Connection>,
    stream_id: StreamId,
    priority: u32,
}

impl ResponseWriter {
    /// Sends `:status` plus any other response headers (§6
    /// "response.write_headers(status, headers)").
    pub async fn write_headers(
        &self,
        status: u16,
        mut headers: HeaderList,
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        headers.insert(0, (":status".to_owned(), status.to_string()));
        self.connection
            .send_headers(self.stream_id, headers, end_stream, self.priority)
            .await
    }

    /// Sends a body chunk (§6 "response.write(data, end)").
    pub async fn write(&self, data: Bytes, end_stream: bool) -> Result<(), Http2Error> {
        self.connection
            .send_data(self.stream_id, data, end_stream, self.priority)
            .await
    }

    /// Promises an associated resource on a freshly reserved stream and
    /// returns a writer for it (§6 "response.push(request_headers) →
    /// PushResponse", §4.3 push-promise coordination).
    pub async fn push(&self, request_headers: HeaderList) -> Result<Self, Http2Error> {
        let promised_id = self
            .connection
            .push(self.stream_id, request_headers, self.priority)
            .await?;
        Ok(Self {
            connection: self.connection.clone(),
            stream_id: promised_id,
            priority: self.priority,
        })
    }
}

/// Drives one already-accepted connection: awaits each peer-initiated
/// stream's request headers, then spawns `handler` on it concurrently
/// with the rest of the connection (§4.4 "create server-side streams on
/// first HEADERS").
pub async fn serve<H, Fut>(mut connection: Connection, handler: H) -> Result<(), Http2Error>
where
    H: Fn(HeaderList, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut incoming = connection.incoming().ok_or(Http2Error::Closed)?;
    let connection = Arc::new(connection);
    let handler = Arc::new(handler);

    while let Some(stream_id) = incoming.recv().await {
        let Some(mut events) = connection.shared.streams.with_stream(stream_id, |s| s.take_events()).flatten() else {
            continue;
        };
        let connection = connection.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let headers = match events.recv().await {
                Some(StreamEvent::Headers(h)) => h,
                _ => {
                    warn!("stream {stream_id} closed before request headers arrived");
                    return;
                }
            };
            trace!("dispatching request on stream {stream_id}: {headers:?}");
            let writer = ResponseWriter {
                connection,
                stream_id,
                priority: PriorityQueue::DEFAULT_PRIORITY,
            };
            handler(headers, writer).await;
        });
    }

    Ok(())
}
