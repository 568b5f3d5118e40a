use std::path::PathBuf;

use clap::Parser;
use medichat_core::TokenVerifier;
use medichat_server::ServerConfig;
use medichat_store::Database;

/// Real-time chat relay for the care portal.
#[derive(Parser, Debug)]
#[command(name = "medichat", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "MEDICHAT_PORT", default_value_t = 5000)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "MEDICHAT_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Path to the chat database
    #[arg(long, env = "MEDICHAT_DB")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let secret = std::env::var("MEDICHAT_JWT_SECRET")
        .expect("MEDICHAT_JWT_SECRET must be set to verify connection tokens");

    let db_path = cli
        .db
        .unwrap_or_else(|| dirs_home().join(".medichat").join("chat.db"));
    let db = Database::open(&db_path).expect("Failed to open chat database");

    let config = ServerConfig {
        bind_addr: cli.bind,
        port: cli.port,
        ..Default::default()
    };
    let handle = medichat_server::start(config, db, TokenVerifier::new(&secret))
        .await
        .expect("Failed to start chat server");

    tracing::info!(port = handle.port, "medichat ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
