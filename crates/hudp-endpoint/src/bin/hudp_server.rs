//! # hudp-server
//!
//! Demo receiver: binds a socket, prints every delivered payload on both
//! channels, and logs a metrics summary periodically and on exit.
//!
//! ```bash
//! hudp-server --bind 127.0.0.1:65432
//! RUST_LOG=hudp_transport=debug hudp-server --config hudp.toml --duration-secs 30
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hudp_endpoint::config::ProtocolConfig;
use hudp_endpoint::metrics::MetricsCollector;
use hudp_endpoint::server::HudpServer;

/// Hybrid UDP transport demo server.
#[derive(Parser, Debug)]
#[command(name = "hudp-server", about = "Hybrid reliable/unreliable UDP receiver")]
struct Cli {
    /// Local address to bind.
    #[arg(long, default_value = "127.0.0.1:65432")]
    bind: SocketAddr,

    /// Protocol configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
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
        bind = %cli.bind,
        duration_secs = cli.duration_secs,
        config = ?cli.config,
        "hudp-server starting"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let server = HudpServer::bind(cli.bind, &config, metrics.clone())?;

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    // ── Main poll loop ──────────────────────────────────────────
    let deadline = std::time::Instant::now() + Duration::from_secs(cli.duration_secs);
    let mut last_stats_log = std::time::Instant::now();
    let stats_interval = Duration::from_secs(10);

    while running.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
        while let Some(d) = server.receive_reliable() {
            tracing::info!(seq = d.sequence, payload = %d.payload, "reliable data");
        }
        while let Some(e) = server.receive_unreliable() {
            tracing::info!(seq = e.sequence, payload = %e.payload, "unreliable data");
        }

        if last_stats_log.elapsed() >= stats_interval {
            tracing::info!("server metrics\n{}", metrics.snapshot());
            last_stats_log = std::time::Instant::now();
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    server.close();

    let snapshot = metrics.snapshot();
    tracing::info!("final server metrics\n{}", snapshot);
    tracing::debug!(json = %snapshot.to_json(), "metrics snapshot");
    Ok(())
}
