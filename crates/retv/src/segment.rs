use std::collections::VecDeque;

use bytes::Bytes;

/// One downloaded media segment.
///
/// `position` is the DASH presentation timestamp or the HLS media
/// sequence number, depending on the owning channel's protocol.
#[derive(Debug, Clone)]
pub struct SegmentData {
    pub position: u64,
    pub payload: Bytes,
    pub duration: f64,
}

/// Fixed-capacity ring of the most recently downloaded segments for one
/// track. Exists for status introspection only: new subscribers are never
/// backfilled from it, they receive live segments going forward.
#[derive(Debug)]
pub struct SegmentBuffer {
    entries: VecDeque<SegmentData>,
    capacity: usize,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a segment, evicting the oldest entry once full.
    pub fn push(&mut self, segment: SegmentData) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(segment);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Position of the newest buffered segment, if any.
    pub fn latest_position(&self) -> Option<u64> {
        self.entries.back().map(|s| s.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(position: u64) -> SegmentData {
        SegmentData {
            position,
            payload: Bytes::from_static(b"payload"),
            duration: 6.0,
        }
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = SegmentBuffer::new(30);
        for i in 0..100 {
            buffer.push(segment(i));
            assert!(buffer.len() <= 30);
        }
        assert_eq!(buffer.len(), 30);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buffer = SegmentBuffer::new(3);
        for i in 0..5 {
            buffer.push(segment(i));
        }
        assert_eq!(buffer.len(), 3);
        // 0 and 1 were evicted; 4 is the live edge.
        assert_eq!(buffer.latest_position(), Some(4));
        assert_eq!(buffer.entries.front().map(|s| s.position), Some(2));
    }
}
