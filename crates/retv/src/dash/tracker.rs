// Live-edge tracking over a parsed DASH timeline.

use std::ops::Range;

use super::manifest::TrackInfo;

/// How many of the newest eligible indices to rewind from when (re)entering
/// the segment loop, so a fresh pass starts near the live edge.
const LIVE_EDGE_REWIND: u64 = 5;

/// Tracks download progress through successive manifest re-parses.
///
/// Indices are positions into the manifest's advertised segment timeline;
/// timestamps are what actually guard against duplicates, since indices
/// shift every time the origin slides its window.
#[derive(Debug)]
pub struct DashEdgeTracker {
    skip_from_start: u64,
    skip_from_end: u64,
    last_video_timestamp: u64,
    last_audio_timestamp: u64,
}

impl DashEdgeTracker {
    pub fn new(skip_from_start: usize, skip_from_end: usize) -> Self {
        Self {
            skip_from_start: skip_from_start as u64,
            skip_from_end: skip_from_end as u64,
            last_video_timestamp: 0,
            last_audio_timestamp: 0,
        }
    }

    /// Index range safe to download: the oldest entries are likely to
    /// have expired on the edge, the newest may not be published yet.
    pub fn eligible_range(&self, seg_count: u64) -> Range<u64> {
        let start = self.skip_from_start;
        let end = seg_count.saturating_sub(self.skip_from_end);
        start..end.max(start)
    }

    /// Where iteration begins: near the live edge, but never before the
    /// start of the eligible range.
    pub fn live_start(&self, seg_count: u64) -> u64 {
        let range = self.eligible_range(seg_count);
        range.start.max(range.end.saturating_sub(LIVE_EDGE_REWIND))
    }

    /// Presentation timestamp of index `i` on one track.
    pub fn timestamp(track: &TrackInfo, index: u64) -> u64 {
        track.start_time + index * track.seg_duration
    }

    /// Duplicate suppression: a candidate is new only if its video
    /// timestamp advances past everything already delivered.
    pub fn is_new(&self, video_timestamp: u64) -> bool {
        video_timestamp > self.last_video_timestamp
    }

    /// Record a fully delivered pair. Keeps the video timestamp
    /// monotonically non-decreasing.
    pub fn advance(&mut self, video_timestamp: u64, audio_timestamp: u64) {
        debug_assert!(video_timestamp >= self.last_video_timestamp);
        self.last_video_timestamp = video_timestamp;
        self.last_audio_timestamp = audio_timestamp;
    }

    pub fn last_video_timestamp(&self) -> u64 {
        self.last_video_timestamp
    }

    pub fn last_audio_timestamp(&self) -> u64 {
        self.last_audio_timestamp
    }
}
