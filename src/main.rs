use beacon_relay::config::RelayConfig;
use beacon_relay::signaling::SignalingServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env()?;

    println!("   Beacon signaling relay");
    println!("   Binding to {}{}", config.bind_addr(), config.ws_path);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(config).await?;
    let router = server.router();

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            router.shutdown().await;
        }
    }

    Ok(())
}
