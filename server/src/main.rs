use clap::Parser;
use log::{error, info, warn};
use server::config::{FileLimit, ServerConfig};
use server::network::{Server, ServerMessage};
use server::roles::StaticDirectory;
use server::scheduler::spawn_reconciliation;
use server::throttle::{LoginThrottle, ThrottleSettings};
use std::sync::Arc;
use std::time::Duration;

/// Parses command-line arguments, then runs the login gate and its
/// reconciliation loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Path to the YAML configuration file
        #[clap(short, long, default_value = "conf/gate.yaml")]
        config: String,
        /// Overrides tick_interval_ms from the config file
        #[clap(short, long)]
        tick_ms: Option<u64>,
    }

    let args = Args::parse();

    let config = ServerConfig::from_file(&args.config)?;
    let tick_interval = Duration::from_millis(args.tick_ms.unwrap_or(config.tick_interval_ms).max(1));
    let directory = StaticDirectory::from_config(&config);
    info!(
        "Loaded {} (max_clients={}, {} known users, tick every {:?})",
        args.config,
        config.max_clients,
        directory.len(),
        tick_interval
    );
    if directory.is_empty() {
        warn!("No user profiles configured, every login is treated as Standard");
    }

    let throttle = Arc::new(LoginThrottle::new(
        Arc::new(FileLimit::new(&args.config, config.max_clients)),
        Arc::new(directory),
        ThrottleSettings::from(&config),
    ));

    let reconciliation = spawn_reconciliation(Arc::clone(&throttle), tick_interval);

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, throttle).await?;
    let control = server.control_handle();
    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped with error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
            if let Err(e) = server_handle.await {
                error!("Server task panicked: {}", e);
            }
        }
    }

    reconciliation.abort();
    Ok(())
}
