// Sequence cursor over successive HLS playlist refreshes.

/// HLS media playlists are already windowed near the live edge by the
/// origin, so eligibility is purely sequence-based: anything newer than
/// the last delivered sequence.
#[derive(Debug, Default)]
pub struct HlsEdgeTracker {
    last_sequence: Option<u64>,
}

impl HlsEdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self, sequence: u64) -> bool {
        self.last_sequence.is_none_or(|last| sequence > last)
    }

    /// Record a delivered segment. Sequences are strictly increasing.
    pub fn advance(&mut self, sequence: u64) {
        debug_assert!(self.is_new(sequence));
        self.last_sequence = Some(sequence);
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_is_new_on_a_fresh_tracker() {
        let tracker = HlsEdgeTracker::new();
        assert!(tracker.is_new(0));
        assert!(tracker.is_new(1800));
    }

    #[test]
    fn sequences_are_strictly_increasing() {
        let mut tracker = HlsEdgeTracker::new();
        tracker.advance(1800);
        assert!(!tracker.is_new(1800));
        assert!(!tracker.is_new(1799));
        assert!(tracker.is_new(1801));
        tracker.advance(1801);
        assert_eq!(tracker.last_sequence(), Some(1801));
    }
}
