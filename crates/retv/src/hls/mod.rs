// HLS acquisition: m3u8 playlist handling and sequence tracking.

mod playlist;
mod tracker;

pub use playlist::{
    HlsMediaPlaylist, HlsSegmentRef, PlaylistDocument, load_media_playlist, parse_playlist,
};
pub use tracker::HlsEdgeTracker;
