use std::collections::VecDeque;

/// Round-robin selector of which virtual stream gets to emit its next
/// `STREAM_DATA` frame on a single-stream transport (§4.8).
///
/// Only consulted by peers whose `Connection::multiplexed()` is `false`
/// (h2, WebSocket); native-multiplex transports give every stream its own
/// transport-level stream and never touch this. A stream enters the queue
/// when it has data pending and leaves once its queue drains for a turn, so
/// a single bulk stream can never emit two consecutive frames while another
/// stream has data waiting (§8 property 9).
#[derive(Default)]
pub struct FairnessQueue {
    order: VecDeque<u64>,
}

impl FairnessQueue {
    pub fn new() -> Self {
        FairnessQueue::default()
    }

    /// Mark `stream_id` as having output pending. A no-op if it is already
    /// queued.
    pub fn mark_pending(&mut self, stream_id: u64) {
        if !self.order.contains(&stream_id) {
            self.order.push_back(stream_id);
        }
    }

    /// Take the next stream due a turn, rotating it to the back of the
    /// queue. The caller re-queues it via [`FairnessQueue::mark_pending`]
    /// only if it still has data after this turn.
    pub fn next_turn(&mut self) -> Option<u64> {
        self.order.pop_front()
    }

    pub fn remove(&mut self, stream_id: u64) {
        self.order.retain(|id| *id != stream_id);
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_pending_streams() {
        let mut q = FairnessQueue::new();
        q.mark_pending(1);
        q.mark_pending(2);
        q.mark_pending(3);

        assert_eq!(q.next_turn(), Some(1));
        assert_eq!(q.next_turn(), Some(2));
        // stream 1 still has data, re-queue it behind 3.
        q.mark_pending(1);
        assert_eq!(q.next_turn(), Some(3));
        assert_eq!(q.next_turn(), Some(1));
        assert!(q.is_empty());
    }

    #[test]
    fn marking_an_already_queued_stream_is_a_no_op() {
        let mut q = FairnessQueue::new();
        q.mark_pending(5);
        q.mark_pending(5);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn bulk_stream_cannot_starve_a_pinging_stream() {
        // Stream 1 (bulk) always has more data; stream 2 (ping) pends
        // occasionally. Even when 1 re-marks itself every turn, 2 is served
        // within one full rotation of however many streams are pending.
        let mut q = FairnessQueue::new();
        q.mark_pending(1);
        q.mark_pending(2);

        let first = q.next_turn().unwrap();
        q.mark_pending(first); // bulk stream still has data
        let second = q.next_turn().unwrap();
        assert_ne!(first, second, "the other stream must get the very next turn");
    }
}
