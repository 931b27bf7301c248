mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use retv_engine::{Channel, ChannelRegistry, EngineConfig, ProxyConfig, Transport};

use crate::error::AppError;

/// How long a stream read waits before re-checking channel liveness.
const READ_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "retv", version, about = "Re-acquire token-gated live TV channels")]
struct Args {
    /// Extended-M3U channel playlist to load.
    #[arg(long)]
    playlist: PathBuf,

    /// Forward proxy endpoint, e.g. http://192.168.30.63:3129.
    #[arg(long)]
    proxy: Option<String>,

    /// Index manifest URL template with {channel_id} and {index_file}
    /// placeholders.
    #[arg(long)]
    manifest_url: Option<String>,

    /// DASH video bandwidth ceiling in bits per second.
    #[arg(long)]
    video_bandwidth: Option<u64>,

    /// Register channels without starting their workers.
    #[arg(long)]
    no_autostart: bool,

    /// Pipe this channel's byte stream to --output.
    #[arg(long)]
    channel: Option<String>,

    /// Stream destination; `-` for stdout.
    #[arg(long, default_value = "-")]
    output: String,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            proxy: self.proxy.as_deref().map(ProxyConfig::http),
            autostart: !self.no_autostart,
            ..EngineConfig::default()
        };
        if let Some(template) = &self.manifest_url {
            config.manifest_url_template = template.clone();
        }
        if let Some(ceiling) = self.video_bandwidth {
            config.video_bandwidth_ceiling = ceiling;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Arc::new(args.engine_config());
    let transport = Transport::new(&config)?;
    let registry = Arc::new(ChannelRegistry::new(Arc::clone(&config), transport));

    let loaded = registry.load_from_playlist(&args.playlist)?;
    info!(loaded, "playlist loaded");
    for status in registry.statuses() {
        println!("{}", serde_json::to_string(&status)?);
    }

    if let Some(channel_id) = &args.channel {
        let channel = registry
            .get(channel_id)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown channel `{channel_id}`")))?;
        if !channel.is_running() {
            channel.start();
        }

        let streaming = {
            let channel = Arc::clone(&channel);
            let output = args.output.clone();
            tokio::spawn(async move {
                if let Err(e) = stream_to_output(&channel, &output).await {
                    error!(error = %e, "stream writer failed");
                }
            })
        };

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        registry.stop_all().await;
        let _ = streaming.await;
    } else {
        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        registry.stop_all().await;
    }

    Ok(())
}

/// Subscribe and copy the channel's byte stream to the output until the
/// channel stops or the hub disconnects us. Reads are bounded so channel
/// liveness is re-checked every few seconds; the subscription is always
/// released, whichever way the loop exits.
async fn stream_to_output(channel: &Channel, output: &str) -> Result<(), AppError> {
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if output == "-" {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(tokio::fs::File::create(output).await?)
    };

    let mut subscriber = channel.subscribe();
    let subscriber_id = subscriber.id();
    info!(channel = channel.id(), subscriber = subscriber_id, "streaming");

    let result = async {
        while channel.is_running() {
            match tokio::time::timeout(READ_WAIT, subscriber.recv()).await {
                Ok(Some(payload)) => {
                    writer.write_all(&payload).await?;
                    writer.flush().await?;
                }
                Ok(None) => {
                    warn!(channel = channel.id(), "disconnected by hub");
                    break;
                }
                // Wait elapsed: loop around and re-check liveness.
                Err(_) => continue,
            }
        }
        Ok(())
    }
    .await;

    channel.unsubscribe(subscriber_id);
    result
}
