use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates local stream IDs for one peer connection, keeping dialer and
/// listener allocations disjoint (§4.7): the dialer hands out 1, 3, 5, …;
/// the listener hands out 2, 4, 6, …. `0` is reserved for peer-level control
/// and is never returned.
pub struct StreamIdAllocator {
    next: AtomicU64,
}

impl StreamIdAllocator {
    pub fn dialer() -> Self {
        StreamIdAllocator { next: AtomicU64::new(1) }
    }

    pub fn listener() -> Self {
        StreamIdAllocator { next: AtomicU64::new(2) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(2, Ordering::Relaxed)
    }
}

/// Allocates `request_id`s, globally unique per agent process (§4.7).
#[derive(Default)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        RequestIdAllocator { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialer_and_listener_ids_never_collide() {
        let dialer = StreamIdAllocator::dialer();
        let listener = StreamIdAllocator::listener();
        let dialer_ids: Vec<u64> = (0..100).map(|_| dialer.next()).collect();
        let listener_ids: Vec<u64> = (0..100).map(|_| listener.next()).collect();
        assert!(dialer_ids.iter().all(|id| id % 2 == 1));
        assert!(listener_ids.iter().all(|id| id % 2 == 0 && *id != 0));
    }

    #[test]
    fn request_ids_are_monotonic_and_nonzero() {
        let allocator = RequestIdAllocator::new();
        let a = allocator.next();
        let b = allocator.next();
        assert!(a > 0);
        assert!(b > a);
    }
}
