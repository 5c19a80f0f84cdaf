use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use relayhub::config::{Config, MAX_MAILBOX_CAPACITY};
use relayhub::gateway::hub::Hub;
use relayhub::state::AppState;

/// Real-time room relay over WebSocket.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Directory of static assets to serve (overrides RELAY_STATIC_DIR)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Outbound frames buffered per session (overrides RELAY_MAILBOX_CAPACITY)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_MAILBOX_CAPACITY as u64))]
    mailbox_capacity: Option<u64>,
}

impl Cli {
    fn apply(self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.static_dir {
            config.static_dir = Some(dir);
        }
        if let Some(capacity) = self.mailbox_capacity {
            config.mailbox_capacity = usize::try_from(capacity).unwrap_or(MAX_MAILBOX_CAPACITY);
        }
        config
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayhub=debug,tower_http=debug".into()),
        )
        .init();

    let config = Cli::parse().apply(Config::from_env());
    print_banner(&config);

    let port = config.port;
    let hub = Hub::spawn();
    let app = relayhub::routes::router(AppState::new(hub, config));

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    axum::serve(listener, app).await.expect("server error");
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let assets = config
        .static_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "disabled".to_string());

    eprintln!();
    eprintln!("  \x1b[1;36mrelayhub\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mstatic\x1b[0m       {assets}");
    eprintln!("  \x1b[2mmailbox\x1b[0m      {} frames", config.mailbox_capacity);
    eprintln!();
}
