// DASH acquisition: MPD parsing and live-edge tracking.

mod manifest;
mod tracker;

pub use manifest::{DashManifest, TrackInfo, parse_mpd};
pub use tracker::DashEdgeTracker;
