//! The connection's `stream_id → Stream` map (§9 "store streams in a
//! stream_id → Stream map owned by the connection") plus the stream-id
//! generator (§4.4). Generalizes the teacher's `StreamCoordinator`
//! (`stream_coordinator.rs`) from a fixed client-only id sequence to one
//! that can run either role, and from a `NonZeroStreamId` key to the
//! plain `StreamId` this crate uses throughout.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::error::ConnectionError;
use crate::stream::Stream;
use crate::types::{StreamId, U31_MAX};

/// Odd ids for a client-initiated connection, even for a server-initiated
/// one (§3 "client-originated ids are odd, server-originated even").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub struct StreamTable {
    role: Role,
    next_local_id: AtomicU32,
    streams: DashMap<StreamId, Stream>,
}

impl StreamTable {
    #[must_use]
    pub fn new(role: Role) -> Self {
        let next_local_id = match role {
            Role::Client => 1,
            Role::Server => 2,
        };
        Self {
            role,
            next_local_id: AtomicU32::new(next_local_id),
            streams: DashMap::new(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Allocates the next locally-initiated stream id (§4.4
    /// "Stream-id generator"). Exhaustion is a connection-fatal error.
    pub fn next_local_id(&self) -> Result<StreamId, ConnectionError> {
        let id = self.next_local_id.fetch_add(2, Ordering::SeqCst);
        if id > U31_MAX {
            return Err(ConnectionError::protocol("stream id space exhausted"));
        }
        Ok(id)
    }

    /// True if `id` was initiated by the peer, based on odd/even parity
    /// relative to this side's role (§4.4 reader dispatch rule).
    #[must_use]
    pub fn is_peer_initiated(&self, id: StreamId) -> bool {
        let locally_odd = matches!(self.role, Role::Client);
        let id_is_odd = id % 2 == 1;
        id_is_odd != locally_odd
    }

    pub fn insert(&self, stream: Stream) {
        self.streams.insert(stream.id, stream);
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn with_stream<T>(&self, id: StreamId, f: impl FnOnce(&mut Stream) -> T) -> Option<T> {
        self.streams.get_mut(&id).map(|mut s| f(s.value_mut()))
    }

    pub fn remove(&self, id: StreamId) {
        self.streams.remove(&id);
    }

    /// All currently-open stream ids, used for GOAWAY severance and
    /// connection-level window fanout.
    pub fn open_ids(&self) -> Vec<StreamId> {
        self.streams
            .iter()
            .filter(|e| !e.value().is_closed())
            .map(|e| *e.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_start_at_one_and_step_by_two() {
        let t = StreamTable::new(Role::Client);
        assert_eq!(t.next_local_id().unwrap(), 1);
        assert_eq!(t.next_local_id().unwrap(), 3);
    }

    #[test]
    fn server_ids_start_at_two() {
        let t = StreamTable::new(Role::Server);
        assert_eq!(t.next_local_id().unwrap(), 2);
    }

    #[test]
    fn client_sees_even_ids_as_peer_initiated() {
        let t = StreamTable::new(Role::Client);
        assert!(t.is_peer_initiated(2));
        assert!(!t.is_peer_initiated(1));
    }

    #[test]
    fn server_sees_odd_ids_as_peer_initiated() {
        let t = StreamTable::new(Role::Server);
        assert!(t.is_peer_initiated(1));
        assert!(!t.is_peer_initiated(2));
    }
}
