use clap::Parser;
use filerelay_daemon::{config::Settings, service::RelayDaemon, Result};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "filerelay-daemon")]
#[command(about = "Peer-relay daemon for file transfer")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen port (overrides the configured value)
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum frame payload in bytes (overrides the configured value)
    #[arg(long)]
    max_frame_len: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("filerelay_daemon={}", log_level))
        .init();

    info!("Starting Filerelay Daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.network.port = port;
    }
    if let Some(max_frame_len) = cli.max_frame_len {
        settings.network.max_frame_len = max_frame_len;
    }

    let daemon = RelayDaemon::bind(settings).await?;

    let shutdown_signal = setup_shutdown_handler();

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("Daemon error: {}", e);
                return Err(e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received, stopping daemon...");
        }
    }

    info!("Filerelay Daemon stopped");
    Ok(())
}

async fn setup_shutdown_handler() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.unwrap();
    }
}
