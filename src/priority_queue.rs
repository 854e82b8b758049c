//! Outbound frame scheduling by priority (§4.5): frames queued for write
//! are ordered by their stream's priority value, ties broken by arrival
//! order so same-priority streams get round-robin-by-FIFO service. A
//! plain `BinaryHeap` gives us the ordering; since `Frame` itself carries
//! no priority, the writer wraps each queued frame with the priority and
//! a monotonic sequence number at push time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::frame::Frame;
use crate::types::StreamId;

/// Lower numeric `priority` sorts first (§4.5 "a smaller PRIORITY value
/// is served ahead of a larger one"); `sequence` only breaks ties.
#[derive(Debug)]
struct Scheduled {
    priority: u32,
    sequence: u64,
    frame: Frame,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert priority so the lowest
        // priority value pops first, and invert sequence so earlier
        // arrivals win ties.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A min-priority outbound queue keyed on `(priority, arrival order)`.
/// Owned by the connection's writer task; the reader task (or any stream
/// operation) pushes frames onto it rather than writing the transport
/// directly, so PRIORITY-bearing streams can jump ahead of lower-priority
/// backlog (§4.5).
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Scheduled>,
    next_sequence: u64,
    /// Stream ids torn down since their frames were queued. Entries
    /// already in `heap` for a tombstoned stream are left in place and
    /// discarded lazily as `pop`/`push_pop` walk past them (§4.5), rather
    /// than scanning the heap to remove them eagerly.
    tombstoned: HashSet<StreamId>,
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            tombstoned: HashSet::new(),
        }
    }

    /// Default priority for frames with no stream-level priority context
    /// (control frames, or streams that never sent PRIORITY/HEADERS
    /// priority info) — the middle of the unsigned range so explicitly
    /// prioritized streams can rank above or below it.
    pub const DEFAULT_PRIORITY: u32 = u32::MAX / 2;

    /// Connection-level frames (stream id 0) are never tombstoned; only
    /// a frame tied to a specific torn-down stream is dropped.
    fn is_live(&self, frame: &Frame) -> bool {
        let stream_id = frame.stream_id();
        stream_id == 0 || !self.tombstoned.contains(&stream_id)
    }

    pub fn push(&mut self, frame: Frame, priority: u32) {
        if !self.is_live(&frame) {
            return;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Scheduled {
            priority,
            sequence,
            frame,
        });
    }

    pub fn pop(&mut self) -> Option<Frame> {
        while let Some(scheduled) = self.heap.pop() {
            if self.is_live(&scheduled.frame) {
                return Some(scheduled.frame);
            }
        }
        None
    }

    /// Enqueue `frame`, then immediately pop and return the
    /// highest-priority frame now queued (§4.5): a newly arriving
    /// high-priority frame may preempt frames already waiting, but it is
    /// not guaranteed to be the one returned if something more urgent was
    /// already queued.
    pub fn push_pop(&mut self, frame: Frame, priority: u32) -> Option<Frame> {
        self.push(frame, priority);
        self.pop()
    }

    /// Marks `stream_id` torn down: already-queued and future frames for
    /// it are dropped instead of written (§4.5, §8.5 "no further frames
    /// are emitted for" a reset stream).
    pub fn tombstone(&mut self, stream_id: StreamId) {
        self.tombstoned.insert(stream_id);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.iter().all(|s| !self.is_live(&s.frame))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.iter().filter(|s| self.is_live(&s.frame)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorType;

    fn ping(n: u8) -> Frame {
        Frame::Ping {
            ack: false,
            data: [n; 8],
        }
    }

    #[test]
    fn higher_priority_value_pops_later() {
        let mut q = PriorityQueue::new();
        q.push(ping(1), 100);
        q.push(ping(2), 10);
        q.push(ping(3), 50);

        assert_eq!(q.pop(), Some(ping(2)));
        assert_eq!(q.pop(), Some(ping(3)));
        assert_eq!(q.pop(), Some(ping(1)));
        assert!(q.pop().is_none());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut q = PriorityQueue::new();
        q.push(ping(1), 5);
        q.push(ping(2), 5);
        q.push(ping(3), 5);

        assert_eq!(q.pop(), Some(ping(1)));
        assert_eq!(q.pop(), Some(ping(2)));
        assert_eq!(q.pop(), Some(ping(3)));
    }

    #[test]
    fn goaway_and_other_frames_still_compare() {
        let mut q = PriorityQueue::new();
        q.push(
            Frame::GoAway {
                last_stream_id: 0,
                error: ErrorType::NoError,
                debug_data: bytes::Bytes::new(),
            },
            0,
        );
        q.push(ping(1), PriorityQueue::DEFAULT_PRIORITY);
        assert!(matches!(q.pop(), Some(Frame::GoAway { .. })));
    }

    fn data(stream_id: StreamId) -> Frame {
        Frame::Data {
            stream_id,
            end_stream: false,
            padding: crate::frame::Padding::none(),
            data: bytes::Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn push_pop_returns_the_new_highest_priority_frame() {
        let mut q = PriorityQueue::new();
        q.push(ping(1), 50);
        let popped = q.push_pop(ping(2), 10);
        assert_eq!(popped, Some(ping(2)));
        assert_eq!(q.pop(), Some(ping(1)));
    }

    #[test]
    fn push_pop_can_return_an_already_queued_higher_priority_frame() {
        let mut q = PriorityQueue::new();
        q.push(ping(1), 5);
        let popped = q.push_pop(ping(2), 50);
        assert_eq!(popped, Some(ping(1)));
        assert_eq!(q.pop(), Some(ping(2)));
    }

    #[test]
    fn tombstoned_stream_frames_are_skipped() {
        let mut q = PriorityQueue::new();
        q.push(data(3), 10);
        q.push(ping(1), 100);
        q.tombstone(3);
        assert_eq!(q.pop(), Some(ping(1)));
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_after_tombstone_is_dropped() {
        let mut q = PriorityQueue::new();
        q.tombstone(3);
        q.push(data(3), 10);
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }
}
