//! Screensheet viewer — entry point.
//!
//! ```text
//! sheet-viewer --code AB12-CD34          Join with a connection code
//! sheet-viewer --host 10.0.0.5:3000      Override the host address
//! sheet-viewer --config <path>           Use custom config TOML
//! sheet-viewer --gen-config              Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sheet_core::error::SheetError;
use sheet_core::transport::HandshakeDescriptor;

use sheet_viewer::config::ViewerConfig;
use sheet_viewer::connection::ViewerSession;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sheet-viewer", about = "Join a shared Screensheet screen")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "sheet-viewer.toml")]
    config: PathBuf,

    /// Host address (overrides config). Example: 192.168.1.100:3000
    #[arg(long)]
    host: Option<String>,

    /// Connection code shown by the host.
    #[arg(long)]
    code: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(addr) = cli.host {
        config.network.host_address = addr;
    }
    if let Some(code) = cli.code {
        config.session.code = code;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("sheet-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect and wait for approval ────────────────────────

    let mut session = ViewerSession::connect(&config).await?;
    let descriptor = match session.handshake().await {
        Ok(descriptor) => descriptor,
        Err(SheetError::Rejected(class)) => {
            error!("host refused the session ({}): {}", class.code(), class.message());
            return Err(SheetError::Rejected(class).into());
        }
        Err(e) => return Err(e.into()),
    };
    if let HandshakeDescriptor::Session { .. } = descriptor {
        session.disconnect().await?;
        return Err("host offered a direct session; this viewer only speaks relayed".into());
    }
    info!(descriptor = ?descriptor, "session established");

    // ── 2. Receive until stopped ────────────────────────────────

    let stop = session.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, leaving session");
        stop.store(false, Ordering::SeqCst);
    });

    let stats_rx = session.stats_receiver();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = stats_rx.borrow().clone();
            info!(
                "{}x{} @ {:.1} fps, {} updates, {} KiB, {} skipped",
                stats.width,
                stats.height,
                stats.fps,
                stats.total_updates,
                stats.total_bytes / 1024,
                stats.skipped_regions,
            );
        }
    });

    let result = session.run().await;
    stats_task.abort();

    // ── 3. Shutdown ─────────────────────────────────────────────

    match result {
        Ok(()) => info!("left session"),
        Err(SheetError::Rejected(class)) => info!("session ended: {}", class.message()),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
