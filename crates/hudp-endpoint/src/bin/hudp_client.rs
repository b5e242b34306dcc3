//! # hudp-client
//!
//! Demo sender: sends numbered reliable payloads to a server, optionally
//! interleaving unreliable ones, waits for ACKs and retransmissions to
//! settle, then logs a metrics summary.
//!
//! ```bash
//! hudp-client --peer 127.0.0.1:65432 --count 10
//! hudp-client --count 100 --unreliable-every 3 --linger-secs 2
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hudp_endpoint::client::HudpClient;
use hudp_endpoint::config::ProtocolConfig;
use hudp_endpoint::metrics::MetricsCollector;

/// Hybrid UDP transport demo client.
#[derive(Parser, Debug)]
#[command(name = "hudp-client", about = "Hybrid reliable/unreliable UDP sender")]
struct Cli {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:65432")]
    peer: SocketAddr,

    /// Protocol configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of reliable packets to send.
    #[arg(long, default_value_t = 10)]
    count: u64,

    /// Send an unreliable packet after every N reliable ones (0 = never).
    #[arg(long, default_value_t = 0)]
    unreliable_every: u64,

    /// Seconds to wait after the last send before reporting.
    #[arg(long, default_value_t = 10)]
    linger_secs: u64,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProtocolConfig::from_file(path)?,
        None => ProtocolConfig::default(),
    };

    tracing::info!(
        peer = %cli.peer,
        count = cli.count,
        unreliable_every = cli.unreliable_every,
        "hudp-client starting"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let client = HudpClient::connect(cli.peer, &config, metrics.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    // ── Send ────────────────────────────────────────────────────
    for i in 0..cli.count {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let seq = client.send_reliable(&format!("Reliable message {i}"))?;
        tracing::info!(seq, "sent reliable packet");

        if cli.unreliable_every > 0 && (i + 1) % cli.unreliable_every == 0 {
            let seq = client.send_unreliable(&format!("Unreliable message {i}"))?;
            tracing::info!(seq, "sent unreliable packet");
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    // ── Linger ──────────────────────────────────────────────────
    let deadline = std::time::Instant::now() + Duration::from_secs(cli.linger_secs);
    while running.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
        for seq in client.abandoned() {
            tracing::warn!(seq, "packet abandoned without ACK");
        }
        if client.in_flight() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    client.close();
    for seq in client.abandoned() {
        tracing::warn!(seq, "packet abandoned without ACK");
    }

    let snapshot = metrics.snapshot();
    tracing::info!("client metrics\n{}", snapshot);
    tracing::debug!(json = %snapshot.to_json(), "metrics snapshot");
    Ok(())
}
