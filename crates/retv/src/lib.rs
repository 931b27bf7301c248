//! Token-gated live stream re-acquisition engine.
//!
//! Each channel runs one background worker that keeps an edge token
//! fresh (the upstream issues them via 307 redirect), re-parses the
//! channel's DASH MPD or HLS playlist, paces segment downloads along the
//! live edge, and fans raw segment bytes out to subscribers. A
//! [`ChannelRegistry`] owns and supervises the whole channel set; the
//! serving layer in front of it only ever calls
//! `subscribe`/`unsubscribe`/`status`.

pub mod broadcast;
pub mod config;
pub mod dash;
pub mod error;
pub mod hls;
pub mod proxy;
pub mod registry;
pub mod segment;
pub mod transport;

mod channel;

// Re-exports for easier access
pub use broadcast::{BroadcastHub, SUBSCRIBER_QUEUE_CAPACITY, Subscriber};
pub use channel::{Channel, ChannelStatus, StreamKind};
pub use config::{DEFAULT_USER_AGENT, EngineConfig};
pub use error::EngineError;
pub use proxy::{ProxyAuth, ProxyConfig, ProxyScheme};
pub use registry::{ChannelRegistry, RegistrySummary};
pub use segment::{SegmentBuffer, SegmentData};
pub use transport::Transport;
