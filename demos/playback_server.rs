//! Playback relay with periodic stats logging
//!
//! Run with: cargo run --example playback_server <VIDEO.ivf> [AUDIO.ogg] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example playback_server output.ivf                      # binds to 0.0.0.0:4321
//!   cargo run --example playback_server output.ivf output.ogg
//!   cargo run --example playback_server output.ivf output.ogg 127.0.0.1:8080
//!
//! Open the page in `public/` and every viewer receives the same paced
//! stream. The file loops until the server is stopped with Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use webrtc_relay::{Relay, RelayConfig, RelayMode, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webrtc_relay=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let video = args.next().map(PathBuf::from);
    let audio = args.next().map(PathBuf::from);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "0.0.0.0:4321".to_string())
        .parse()?;

    if video.is_none() {
        eprintln!("usage: playback_server <VIDEO.ivf> [AUDIO.ogg] [BIND_ADDR]");
        std::process::exit(2);
    }

    let config = RelayConfig::with_addr(addr)
        .mode(RelayMode::Playback)
        .playback_files(video, audio);

    let server = Arc::new(RelayServer::new(Relay::new(config)?));

    let relay = Arc::clone(server.relay());
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let report = relay.report().await;
            println!(
                "viewers={} frames={} delivered={} failed={} passes={}",
                report.active_sessions,
                report.stats.frames_broadcast,
                report.stats.writes_delivered,
                report.stats.writes_failed,
                report.stats.playback_passes,
            );
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    stats_task.abort();
    Ok(())
}
