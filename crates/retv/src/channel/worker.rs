// Per-channel acquisition loop: TokenRefresh -> ManifestParse ->
// InitFetch (DASH) -> SegmentLoop, repeating until cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastHub;
use crate::channel::{ChannelStats, InitPayloads, StreamKind};
use crate::config::EngineConfig;
use crate::dash::{DashEdgeTracker, DashManifest, parse_mpd};
use crate::error::EngineError;
use crate::hls::{HlsEdgeTracker, HlsMediaPlaylist, load_media_playlist};
use crate::segment::{SegmentBuffer, SegmentData};
use crate::transport::Transport;

/// Backoff after a failed state transition.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff after an incomplete DASH segment pair.
const PAIR_BACKOFF: Duration = Duration::from_millis(500);

/// Fraction of a segment's duration slept after delivering it.
const PACING_FACTOR: f64 = 0.8;

/// Fraction of the target duration slept after an HLS pass that
/// delivered nothing, to re-poll the live edge faster.
const IDLE_PACING_FACTOR: f64 = 0.4;

/// Everything a worker needs, cloned out of the owning `Channel` so the
/// spawned task borrows nothing.
pub(crate) struct WorkerContext {
    pub channel_id: String,
    pub channel_name: String,
    pub kind: StreamKind,
    pub bandwidth_ceiling: u64,
    pub config: Arc<EngineConfig>,
    pub transport: Transport,
    pub hub: Arc<BroadcastHub>,
    pub stats: Arc<ChannelStats>,
    pub init_payloads: Arc<Mutex<InitPayloads>>,
    pub token: CancellationToken,
}

/// A tokenized edge acquired via the index-manifest redirect.
struct EdgeSession {
    base_url: String,
    acquired_at: Instant,
}

impl EdgeSession {
    fn is_stale(&self, interval: Duration) -> bool {
        self.acquired_at.elapsed() > interval
    }
}

/// When the driver loop re-acquires the edge token.
#[derive(Clone, Copy, PartialEq, Eq)]
enum TokenCadence {
    /// Re-acquire at the top of every cycle (DASH: a full timeline pass
    /// typically approaches the token lifetime anyway).
    EveryCycle,
    /// Re-acquire only once the token exceeds the refresh interval
    /// (HLS: cycles are one playlist window, a few seconds).
    WhenStale,
}

/// Protocol strategy plugged into the shared state-machine driver.
#[async_trait]
trait ProtocolDriver: Send {
    fn token_cadence(&self) -> TokenCadence;

    /// ManifestParse: fetch and re-parse the protocol manifest from the
    /// edge base, replacing the previous timeline wholesale.
    async fn reload_manifest(
        &mut self,
        cx: &WorkerContext,
        session: &EdgeSession,
    ) -> Result<(), EngineError>;

    /// InitFetch: cache whatever the protocol needs once per worker.
    async fn ensure_init(
        &mut self,
        _cx: &WorkerContext,
        _session: &EdgeSession,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// SegmentLoop: one pass over the currently eligible segments.
    /// Returns Ok on exhaustion; `EngineError::Cancelled` aborts the
    /// worker, anything else re-enters TokenRefresh after a backoff.
    async fn segment_pass(
        &mut self,
        cx: &WorkerContext,
        session: &mut EdgeSession,
    ) -> Result<(), EngineError>;
}

/// Worker entry point. Runs until the channel's token is cancelled; no
/// error escapes this function.
pub(crate) async fn run(cx: WorkerContext) {
    info!(
        channel = %cx.channel_id,
        name = %cx.channel_name,
        kind = cx.kind.as_str(),
        "worker loop starting"
    );
    match cx.kind {
        StreamKind::Dash => {
            let driver = DashDriver::new(&cx.config);
            drive(&cx, driver).await;
        }
        StreamKind::Hls => {
            let driver = HlsDriver::new(&cx.config);
            drive(&cx, driver).await;
        }
    }
    info!(channel = %cx.channel_id, "worker loop finished");
}

async fn drive<P: ProtocolDriver>(cx: &WorkerContext, mut driver: P) {
    let mut session: Option<EdgeSession> = None;

    while !cx.token.is_cancelled() {
        // TokenRefresh
        let needs_token = match driver.token_cadence() {
            TokenCadence::EveryCycle => true,
            TokenCadence::WhenStale => session
                .as_ref()
                .is_none_or(|s| s.is_stale(cx.config.token_refresh_interval)),
        };
        if needs_token {
            match refresh_token(cx).await {
                Ok(fresh) => session = Some(fresh),
                Err(e) => {
                    if fail_state(cx, "token refresh", e).await {
                        break;
                    }
                    continue;
                }
            }
        }
        let Some(active) = session.as_mut() else {
            continue;
        };

        // ManifestParse
        if let Err(e) = driver.reload_manifest(cx, active).await {
            if fail_state(cx, "manifest parse", e).await {
                break;
            }
            continue;
        }

        // InitFetch
        if let Err(e) = driver.ensure_init(cx, active).await {
            if fail_state(cx, "init fetch", e).await {
                break;
            }
            continue;
        }

        // SegmentLoop
        match driver.segment_pass(cx, active).await {
            Ok(()) => {
                debug!(channel = %cx.channel_id, "timeline exhausted, refreshing");
            }
            Err(EngineError::Cancelled) => break,
            Err(e) => {
                if fail_state(cx, "segment loop", e).await {
                    break;
                }
            }
        }
    }
}

/// Record a failed state, back off, and report whether the worker was
/// cancelled while sleeping.
async fn fail_state(cx: &WorkerContext, state: &'static str, e: EngineError) -> bool {
    error!(channel = %cx.channel_id, state, error = %e, "state failed, backing off");
    cx.stats.record_error(&e);
    pause(&cx.token, RETRY_BACKOFF).await
}

/// Sleep racing cancellation; true means the worker must exit.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Fetch the channel's index manifest, following the token-issuing
/// redirect, and derive the edge base URL from the final location.
async fn refresh_token(cx: &WorkerContext) -> Result<EdgeSession, EngineError> {
    let index_file = cx.kind.index_file();
    let url = cx.config.index_url(&cx.channel_id, index_file);
    let (_, final_url) = cx.transport.fetch(&url, cx.config.manifest_timeout).await?;
    let base_url = strip_index_suffix(&final_url, index_file);
    debug!(channel = %cx.channel_id, edge = %base_url, "token refreshed");
    Ok(EdgeSession {
        base_url,
        acquired_at: Instant::now(),
    })
}

/// Everything before the last occurrence of `/<index_file>`. A final URL
/// without the suffix is kept whole; subsequent fetches will fail and be
/// counted rather than aborting the worker.
fn strip_index_suffix(final_url: &str, index_file: &str) -> String {
    let suffix = format!("/{index_file}");
    match final_url.rfind(&suffix) {
        Some(pos) => final_url[..pos].to_owned(),
        None => final_url.to_owned(),
    }
}

// --- DASH ---

struct DashDriver {
    manifest: Option<DashManifest>,
    tracker: DashEdgeTracker,
    video_buffer: SegmentBuffer,
    audio_buffer: SegmentBuffer,
}

impl DashDriver {
    fn new(config: &EngineConfig) -> Self {
        Self {
            manifest: None,
            tracker: DashEdgeTracker::new(config.skip_from_start, config.skip_from_end),
            video_buffer: SegmentBuffer::new(config.buffer_capacity),
            audio_buffer: SegmentBuffer::new(config.buffer_capacity),
        }
    }
}

#[async_trait]
impl ProtocolDriver for DashDriver {
    fn token_cadence(&self) -> TokenCadence {
        TokenCadence::EveryCycle
    }

    async fn reload_manifest(
        &mut self,
        cx: &WorkerContext,
        session: &EdgeSession,
    ) -> Result<(), EngineError> {
        let url = format!("{}/{}", session.base_url, cx.kind.index_file());
        let (data, _) = cx.transport.fetch(&url, cx.config.manifest_timeout).await?;
        let manifest = parse_mpd(&data, cx.bandwidth_ceiling)?;
        cx.stats
            .set_representations(&manifest.video.repr_id, &manifest.audio.repr_id);
        self.manifest = Some(manifest);
        Ok(())
    }

    async fn ensure_init(
        &mut self,
        cx: &WorkerContext,
        session: &EdgeSession,
    ) -> Result<(), EngineError> {
        if cx.init_payloads.lock().is_complete() {
            return Ok(());
        }
        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| EngineError::manifest("no manifest before init fetch"))?;

        let (video, _) = cx
            .transport
            .fetch(
                &manifest.video.init_url(&session.base_url),
                cx.config.dash_segment_timeout,
            )
            .await?;
        let (audio, _) = cx
            .transport
            .fetch(
                &manifest.audio.init_url(&session.base_url),
                cx.config.dash_segment_timeout,
            )
            .await?;

        info!(
            channel = %cx.channel_id,
            video_bytes = video.len(),
            audio_bytes = audio.len(),
            "initialization segments cached"
        );
        let mut init = cx.init_payloads.lock();
        init.video = Some(video);
        init.audio = Some(audio);
        Ok(())
    }

    async fn segment_pass(
        &mut self,
        cx: &WorkerContext,
        session: &mut EdgeSession,
    ) -> Result<(), EngineError> {
        let Some(manifest) = self.manifest.clone() else {
            return Ok(());
        };
        let (mut video, mut audio) = (manifest.video, manifest.audio);
        let mut end = self.tracker.eligible_range(video.seg_count).end;
        let mut index = self.tracker.live_start(video.seg_count);
        let mut attempted = false;

        while index < end {
            if cx.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // The edge token outlives several segments but not a whole
            // pass; re-acquire mid-pass and pick up the moved timeline.
            if session.is_stale(cx.config.token_refresh_interval) {
                *session = refresh_token(cx).await?;
                self.reload_manifest(cx, session).await?;
                if let Some(m) = self.manifest.clone() {
                    video = m.video;
                    audio = m.audio;
                    end = self.tracker.eligible_range(video.seg_count).end;
                }
            }

            let vt = DashEdgeTracker::timestamp(&video, index);
            let at = DashEdgeTracker::timestamp(&audio, index);
            if !self.tracker.is_new(vt) {
                index += 1;
                continue;
            }
            attempted = true;

            let video_payload = cx
                .transport
                .fetch_or_log(
                    &video.media_url(&session.base_url, vt),
                    cx.config.dash_segment_timeout,
                )
                .await;
            let audio_payload = cx
                .transport
                .fetch_or_log(
                    &audio.media_url(&session.base_url, at),
                    cx.config.dash_segment_timeout,
                )
                .await;

            match (video_payload, audio_payload) {
                (Some(video_payload), Some(audio_payload)) => {
                    self.tracker.advance(vt, at);
                    let duration = video.duration_secs();
                    self.video_buffer.push(SegmentData {
                        position: vt,
                        payload: video_payload.clone(),
                        duration,
                    });
                    self.audio_buffer.push(SegmentData {
                        position: at,
                        payload: audio_payload.clone(),
                        duration,
                    });
                    cx.stats.set_buffer_len(self.video_buffer.len());

                    cx.hub.broadcast(concat_pair(&video_payload, &audio_payload));
                    cx.stats.record_segment();

                    if pause(&cx.token, Duration::from_secs_f64(duration * PACING_FACTOR)).await {
                        return Err(EngineError::Cancelled);
                    }
                }
                _ => {
                    // One half of the pair failed: discard both, never
                    // deliver a partial interval.
                    warn!(channel = %cx.channel_id, timestamp = vt, "incomplete segment pair");
                    cx.stats
                        .record_error(&EngineError::PartialSegment { timestamp: vt });
                    if pause(&cx.token, PAIR_BACKOFF).await {
                        return Err(EngineError::Cancelled);
                    }
                }
            }
            index += 1;
        }

        // Every candidate was a duplicate: give the origin a moment to
        // extend the timeline instead of hammering the manifest.
        if !attempted && pause(&cx.token, Duration::from_secs(1)).await {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// One delivered interval: video bytes immediately followed by the
/// time-aligned audio bytes.
fn concat_pair(video: &Bytes, audio: &Bytes) -> Bytes {
    let mut chunk = BytesMut::with_capacity(video.len() + audio.len());
    chunk.extend_from_slice(video);
    chunk.extend_from_slice(audio);
    chunk.freeze()
}

// --- HLS ---

struct HlsDriver {
    playlist: Option<HlsMediaPlaylist>,
    tracker: HlsEdgeTracker,
    buffer: SegmentBuffer,
    target_duration: f64,
}

impl HlsDriver {
    fn new(config: &EngineConfig) -> Self {
        Self {
            playlist: None,
            tracker: HlsEdgeTracker::new(),
            buffer: SegmentBuffer::new(config.buffer_capacity),
            target_duration: 6.0,
        }
    }
}

#[async_trait]
impl ProtocolDriver for HlsDriver {
    fn token_cadence(&self) -> TokenCadence {
        TokenCadence::WhenStale
    }

    async fn reload_manifest(
        &mut self,
        cx: &WorkerContext,
        session: &EdgeSession,
    ) -> Result<(), EngineError> {
        let url = format!("{}/{}", session.base_url, cx.kind.index_file());
        let playlist =
            load_media_playlist(&cx.transport, &url, cx.config.manifest_timeout).await?;
        if playlist.target_duration > 0.0 {
            self.target_duration = playlist.target_duration;
        }
        self.playlist = Some(playlist);
        Ok(())
    }

    async fn segment_pass(
        &mut self,
        cx: &WorkerContext,
        _session: &mut EdgeSession,
    ) -> Result<(), EngineError> {
        let Some(playlist) = self.playlist.take() else {
            return Ok(());
        };

        let mut delivered = 0usize;
        for segment in &playlist.segments {
            if cx.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if !self.tracker.is_new(segment.sequence) {
                continue;
            }

            match cx
                .transport
                .fetch_or_log(&segment.url, cx.config.manifest_timeout)
                .await
            {
                Some(payload) => {
                    self.tracker.advance(segment.sequence);
                    self.buffer.push(SegmentData {
                        position: segment.sequence,
                        payload: payload.clone(),
                        duration: segment.duration,
                    });
                    cx.stats.set_buffer_len(self.buffer.len());
                    cx.hub.broadcast(payload);
                    cx.stats.record_segment();
                    delivered += 1;
                }
                None => {
                    warn!(
                        channel = %cx.channel_id,
                        sequence = segment.sequence,
                        "segment fetch failed"
                    );
                    cx.stats.bump_errors();
                }
            }
        }

        // Pace against the target duration: slower after a productive
        // pass, faster when the playlist had nothing new yet.
        let factor = if delivered > 0 {
            PACING_FACTOR
        } else {
            IDLE_PACING_FACTOR
        };
        if pause(
            &cx.token,
            Duration::from_secs_f64(self.target_duration * factor),
        )
        .await
        {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_index_suffix_from_redirected_url() {
        assert_eq!(
            strip_index_suffix(
                "https://edge.example.com/token-abc123/index.mpd",
                "index.mpd"
            ),
            "https://edge.example.com/token-abc123"
        );
        assert_eq!(
            strip_index_suffix("https://edge.example.com/live/index.m3u8", "index.m3u8"),
            "https://edge.example.com/live"
        );
    }

    #[test]
    fn suffix_free_url_is_kept_whole() {
        assert_eq!(
            strip_index_suffix("https://edge.example.com/live", "index.mpd"),
            "https://edge.example.com/live"
        );
    }

    #[test]
    fn concat_preserves_video_then_audio_order() {
        let chunk = concat_pair(&Bytes::from_static(b"vid"), &Bytes::from_static(b"aud"));
        assert_eq!(chunk, Bytes::from_static(b"vidaud"));
    }

    #[tokio::test]
    async fn pause_reports_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(pause(&token, Duration::from_secs(60)).await);

        let token = CancellationToken::new();
        assert!(!pause(&token, Duration::from_millis(1)).await);
    }
}
