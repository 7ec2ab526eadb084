//! webrtc-relay - real-time WebRTC media relay
//!
//! Modes:
//! - `broadcast` - media published by any peer is fanned out to every peer
//! - `playback` - a VP8 IVF and/or Opus Ogg file is paced out to every peer
//! - `mirror` - every peer receives its own media back

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use webrtc_relay::relay::{PlaybackConfig, ReadErrorPolicy};
use webrtc_relay::{Relay, RelayConfig, RelayMode, RelayServer, DEFAULT_ICE_SERVER};

#[derive(Parser)]
#[command(name = "webrtc-relay")]
#[command(about = "Real-time WebRTC media relay")]
#[command(version)]
struct Cli {
    /// Address of the signaling endpoint
    #[arg(short, long, default_value = "0.0.0.0:4321")]
    bind: SocketAddr,

    /// Relay mode: broadcast, playback or mirror
    #[arg(short, long, default_value = "broadcast")]
    mode: RelayMode,

    /// VP8 IVF file to play in playback mode
    #[arg(long)]
    video: Option<PathBuf>,

    /// Opus Ogg file to play in playback mode
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Directory with the browser client
    #[arg(long, default_value = "public")]
    public: PathBuf,

    /// ICE server URL (repeatable)
    #[arg(long = "ice", default_value = DEFAULT_ICE_SERVER)]
    ice_servers: Vec<String>,

    /// Fail session writes that take longer than this
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Repeat key frame requests this often in mirror mode
    #[arg(long)]
    pli_interval_ms: Option<u64>,

    /// Stop playback on a read error instead of reopening the file
    #[arg(long)]
    fatal_read_errors: bool,
}

impl Cli {
    fn into_config(self) -> RelayConfig {
        let policy = if self.fatal_read_errors {
            ReadErrorPolicy::Fatal
        } else {
            ReadErrorPolicy::Reopen
        };

        let mut config = RelayConfig::with_addr(self.bind)
            .mode(self.mode)
            .public_dir(self.public)
            .ice_servers(self.ice_servers)
            .playback_files(self.video, self.audio)
            .playback(PlaybackConfig::default().read_error_policy(policy));

        if let Some(ms) = self.write_timeout_ms {
            config = config.write_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.pli_interval_ms {
            config = config.pli_interval(Duration::from_millis(ms));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webrtc_relay=info".parse()?)
                .add_directive("webrtc=warn".parse()?),
        )
        .init();

    let config = cli.into_config();
    tracing::info!(
        mode = %config.mode,
        bind = %config.bind_addr,
        "Starting relay"
    );

    let server = RelayServer::new(Relay::new(config)?);

    // Failing to bind or to start is the only fatal error
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
