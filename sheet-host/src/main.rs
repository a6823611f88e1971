//! Screensheet host — entry point.
//!
//! ```text
//! sheet-host                     Share the screen with the default config
//! sheet-host --config <path>     Load a custom config TOML
//! sheet-host --gen-config        Write default config to stdout
//! sheet-host --port 4000         Override the listen port
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sheet_host::config::SheetHostConfig;
use sheet_host::injector::LoggingInjector;
use sheet_host::service::HostService;
use sheet_host::source::TestPatternSource;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sheet-host", about = "Share this screen with Screensheet viewers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "sheet-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the relay mode ("diff" or "continuous").
    #[arg(long)]
    mode: Option<String>,

    /// Wait for an explicit decision instead of auto-approving.
    #[arg(long)]
    manual_approve: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&SheetHostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SheetHostConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(mode) = cli.mode {
        config.session.relay_mode = mode;
    }
    if cli.manual_approve {
        config.session.auto_approve = false;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    }

    info!("sheet-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", config.listen_addr());
    info!("relay mode: {}", config.session.relay_mode);
    info!("target FPS: {}", config.screen.fps);

    let source = Arc::new(TestPatternSource::new(config.screen.width, config.screen.height));
    let service = HostService::new(config, source, Arc::new(LoggingInjector::new()))?;
    let code = service.exchange().start();
    info!("connection code: {code}");

    // Ctrl-C handler.
    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
