// HLS playlist fetching and parsing.

use std::time::Duration;

use m3u8_rs::parse_playlist_res;
use tracing::debug;
use url::Url;

use crate::error::EngineError;
use crate::transport::Transport;

/// One segment entry of a media playlist: consecutive sequence number,
/// duration in seconds, absolute URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HlsSegmentRef {
    pub sequence: u64,
    pub duration: f64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HlsMediaPlaylist {
    /// `#EXT-X-TARGETDURATION`, which also drives segment-loop pacing.
    pub target_duration: f64,
    pub segments: Vec<HlsSegmentRef>,
}

/// Outcome of parsing one m3u8 document.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistDocument {
    Media(HlsMediaPlaylist),
    /// Master/variant-selection playlist. The engine always takes the
    /// first listed variant, with no bandwidth comparison.
    Master { first_variant: String },
}

/// Parse an m3u8 document fetched from `playlist_url`.
///
/// Sequence numbers are assigned consecutively from
/// `#EXT-X-MEDIA-SEQUENCE`; relative segment URIs are resolved against
/// the playlist's own URL.
pub fn parse_playlist(data: &[u8], playlist_url: &str) -> Result<PlaylistDocument, EngineError> {
    let base = Url::parse(playlist_url)
        .map_err(|e| EngineError::invalid_url(playlist_url, e.to_string()))?;

    match parse_playlist_res(data) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => {
            let target_duration = pl.target_duration as f64;
            let mut segments = Vec::with_capacity(pl.segments.len());
            for (idx, seg) in pl.segments.iter().enumerate() {
                let url = base
                    .join(&seg.uri)
                    .map_err(|e| EngineError::invalid_url(&seg.uri, e.to_string()))?;
                let duration = if seg.duration > 0.0 {
                    seg.duration as f64
                } else {
                    target_duration
                };
                segments.push(HlsSegmentRef {
                    sequence: pl.media_sequence + idx as u64,
                    duration,
                    url: url.into(),
                });
            }
            Ok(PlaylistDocument::Media(HlsMediaPlaylist {
                target_duration,
                segments,
            }))
        }
        Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => {
            let variant = pl
                .variants
                .first()
                .ok_or_else(|| EngineError::manifest("master playlist has no variants"))?;
            let url = base
                .join(&variant.uri)
                .map_err(|e| EngineError::invalid_url(&variant.uri, e.to_string()))?;
            Ok(PlaylistDocument::Master {
                first_variant: url.into(),
            })
        }
        Err(e) => Err(EngineError::manifest(format!("m3u8 parse failed: {e}"))),
    }
}

/// Fetch and parse `url` down to a media playlist, following a master
/// playlist into its first variant. One level of recursion only.
pub async fn load_media_playlist(
    transport: &Transport,
    url: &str,
    timeout: Duration,
) -> Result<HlsMediaPlaylist, EngineError> {
    let (data, final_url) = transport.fetch(url, timeout).await?;
    match parse_playlist(&data, &final_url)? {
        PlaylistDocument::Media(playlist) => Ok(playlist),
        PlaylistDocument::Master { first_variant } => {
            debug!(variant = %first_variant, "master playlist, descending into first variant");
            let (data, final_url) = transport.fetch(&first_variant, timeout).await?;
            match parse_playlist(&data, &final_url)? {
                PlaylistDocument::Media(playlist) => Ok(playlist),
                PlaylistDocument::Master { .. } => Err(EngineError::manifest(
                    "variant playlist is itself a master playlist",
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:1800\n\
#EXTINF:6.000,\n\
seg1800.ts\n\
#EXTINF:5.760,\n\
seg1801.ts\n\
#EXTINF:6.000,\n\
https://other.example.com/seg1802.ts\n";

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
low/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\n\
high/index.m3u8\n";

    #[test]
    fn media_playlist_sequences_are_consecutive() {
        let doc = parse_playlist(MEDIA.as_bytes(), "https://edge/live/index.m3u8").unwrap();
        let PlaylistDocument::Media(pl) = doc else {
            panic!("expected media playlist");
        };
        assert_eq!(pl.target_duration, 6.0);
        assert_eq!(pl.segments.len(), 3);
        assert_eq!(
            pl.segments.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![1800, 1801, 1802]
        );
        assert_eq!(pl.segments[1].duration, 5.76f32 as f64);
    }

    #[test]
    fn relative_uris_resolve_against_playlist_base() {
        let doc = parse_playlist(MEDIA.as_bytes(), "https://edge/live/index.m3u8").unwrap();
        let PlaylistDocument::Media(pl) = doc else {
            panic!("expected media playlist");
        };
        assert_eq!(pl.segments[0].url, "https://edge/live/seg1800.ts");
        assert_eq!(pl.segments[2].url, "https://other.example.com/seg1802.ts");
    }

    #[test]
    fn master_playlist_selects_first_variant_regardless_of_bandwidth() {
        let doc = parse_playlist(MASTER.as_bytes(), "https://edge/live/index.m3u8").unwrap();
        assert_eq!(
            doc,
            PlaylistDocument::Master {
                first_variant: "https://edge/live/low/index.m3u8".to_owned()
            }
        );
    }

    #[test]
    fn garbage_is_a_manifest_error() {
        let err = parse_playlist(b"not a playlist", "https://edge/index.m3u8").unwrap_err();
        assert!(matches!(err, EngineError::Manifest { .. }));
    }
}
