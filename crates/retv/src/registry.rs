// Supervision of the channel set: creation, lookup, shutdown, playlist
// import.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel::{Channel, ChannelStatus, StreamKind};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::transport::Transport;

/// Owns every live `Channel`, one per identifier, from registration to
/// explicit removal. All workers share the registry's transport.
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    config: Arc<EngineConfig>,
    transport: Transport,
}

/// Fleet-wide aggregation of the per-channel statuses.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_channels: usize,
    pub running_channels: usize,
    pub total_segments: u64,
    pub total_errors: u64,
    pub total_clients: usize,
}

impl ChannelRegistry {
    pub fn new(config: Arc<EngineConfig>, transport: Transport) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
            transport,
        }
    }

    /// Register a channel. Idempotent: an existing channel is returned
    /// untouched, so a second `add` never spawns a second worker.
    pub fn add(
        &self,
        id: &str,
        name: &str,
        kind: StreamKind,
        bandwidth_ceiling: Option<u64>,
        autostart: bool,
    ) -> Arc<Channel> {
        let channel = {
            let mut channels = self.channels.lock();
            if let Some(existing) = channels.get(id) {
                return Arc::clone(existing);
            }
            let ceiling = bandwidth_ceiling.unwrap_or(self.config.video_bandwidth_ceiling);
            let channel = Channel::new(
                id,
                name,
                kind,
                ceiling,
                Arc::clone(&self.config),
                self.transport.clone(),
            );
            channels.insert(id.to_owned(), Arc::clone(&channel));
            channel
        };

        info!(channel = id, name, kind = kind.as_str(), "channel registered");
        if autostart {
            channel.start();
        }
        channel
    }

    /// Stop and discard a channel. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let channel = self.channels.lock().remove(id);
        match channel {
            Some(channel) => {
                channel.stop().await;
                info!(channel = id, "channel removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.lock().get(id).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels
            .lock()
            .values()
            .map(|channel| channel.status())
            .collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        let statuses = self.statuses();
        RegistrySummary {
            total_channels: statuses.len(),
            running_channels: statuses.iter().filter(|s| s.running).count(),
            total_segments: statuses.iter().map(|s| s.segments).sum(),
            total_errors: statuses.iter().map(|s| s.errors).sum(),
            total_clients: statuses.iter().map(|s| s.clients).sum(),
        }
    }

    /// Stop every worker. Channels stay registered; used at shutdown.
    pub async fn stop_all(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.lock().values().map(Arc::clone).collect();
        for channel in channels {
            channel.stop().await;
        }
    }

    /// Load channels from an extended-M3U playlist file: `#EXTINF` lines
    /// carry display names, URL lines carry the channel id in the path
    /// segment after the configured marker. `.m3u8` URLs become HLS
    /// channels, everything else DASH. Returns how many URL lines
    /// produced a registration (idempotently, for already-known ids).
    pub fn load_from_playlist(&self, path: &std::path::Path) -> Result<usize, EngineError> {
        let text = std::fs::read_to_string(path)?;
        let marker = format!("/{}/", self.config.channel_id_marker);

        let mut count = 0;
        let mut name = String::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some(meta) = line.strip_prefix("#EXTINF:") {
                name = meta
                    .split_once(',')
                    .map(|(_, n)| n.trim().to_owned())
                    .unwrap_or_default();
            } else if line.starts_with("https://") || line.starts_with("http://") {
                let Some(id) = channel_id_from_url(line, &marker) else {
                    warn!(url = line, "playlist URL without channel id marker, skipping");
                    name.clear();
                    continue;
                };
                let kind = if line.contains(".m3u8") {
                    StreamKind::Hls
                } else {
                    StreamKind::Dash
                };
                self.add(id, &name, kind, None, self.config.autostart);
                count += 1;
                name.clear();
            }
        }

        info!(count, path = %path.display(), "channels loaded from playlist");
        Ok(count)
    }
}

/// The path component immediately after the marker segment.
fn channel_id_from_url<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = url.split_once(marker)?;
    let id = rest.split('/').next().unwrap_or("");
    (!id.is_empty()).then_some(id)
}
