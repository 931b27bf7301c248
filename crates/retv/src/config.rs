use std::time::Duration;

use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "retv-engine/0.4";

/// Default ceiling on the declared bandwidth of the selected DASH video
/// representation, in bits per second.
pub const DEFAULT_VIDEO_BANDWIDTH_CEILING: u64 = 1_087_600;

/// Configurable options for the acquisition engine.
///
/// One `EngineConfig` is built at process start and shared by every
/// channel worker. Per-channel overrides (bandwidth ceiling) are applied
/// at registration time, not here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// URL template of the token-issuing index manifest. Must contain the
    /// `{channel_id}` and `{index_file}` placeholders; the final request
    /// is redirected to a tokenized edge URL.
    pub manifest_url_template: String,

    /// Forward proxy every request is routed through (optional).
    pub proxy: Option<ProxyConfig>,

    /// Fixed identifying header sent on every request.
    pub user_agent: String,

    /// Age after which the edge token must be re-acquired.
    pub token_refresh_interval: Duration,

    /// Per-track ring buffer capacity, in segments.
    pub buffer_capacity: usize,

    /// Oldest DASH segments excluded from the eligible index range.
    pub skip_from_start: usize,

    /// Newest DASH segments excluded from the eligible index range, since
    /// the manifest may advertise entries the edge has not published yet.
    pub skip_from_end: usize,

    /// Default DASH video bandwidth ceiling (bits per second).
    pub video_bandwidth_ceiling: u64,

    /// Whether channels loaded from a playlist start immediately.
    pub autostart: bool,

    /// Path segment of a playlist URL that carries the channel identifier
    /// (the component immediately after this marker).
    pub channel_id_marker: String,

    /// Timeout for manifest/playlist fetches and HLS segment fetches.
    pub manifest_timeout: Duration,

    /// Timeout for DASH media and initialization segment fetches.
    pub dash_segment_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manifest_url_template: "https://cdn.example.com/bpk-tv/{channel_id}/tve/{index_file}"
                .to_owned(),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            token_refresh_interval: Duration::from_secs(80),
            buffer_capacity: 30,
            skip_from_start: 3,
            skip_from_end: 2,
            video_bandwidth_ceiling: DEFAULT_VIDEO_BANDWIDTH_CEILING,
            autostart: true,
            channel_id_marker: "bpk-tv".to_owned(),
            manifest_timeout: Duration::from_secs(15),
            dash_segment_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Expand the index manifest template for one channel.
    pub fn index_url(&self, channel_id: &str, index_file: &str) -> String {
        self.manifest_url_template
            .replace("{channel_id}", channel_id)
            .replace("{index_file}", index_file)
    }
}
