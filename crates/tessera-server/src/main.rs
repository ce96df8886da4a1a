use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use tessera_server::NodeConfig;
use tessera_store::CachePolicy;

#[derive(Parser)]
#[command(name = "tessera-server", about = "tessera key-value server node")]
struct Args {
    /// advertised host, part of the node's ring identity
    #[arg(long, default_value = "127.0.0.1", env = "TESSERA_HOST")]
    host: String,

    /// port to listen on
    #[arg(short, long, env = "TESSERA_PORT")]
    port: u16,

    /// coordinator address (host:port) to register with
    #[arg(long, env = "TESSERA_COORDINATOR")]
    coordinator: Option<String>,

    /// directory for storage and replica files
    #[arg(long, default_value = "data", env = "TESSERA_DATA_DIR")]
    data_dir: PathBuf,

    /// in-memory cache capacity in entries (0 disables caching)
    #[arg(long, default_value_t = 0, env = "TESSERA_CACHE_SIZE")]
    cache_size: usize,

    /// cache displacement policy: FIFO, LRU or LFU
    #[arg(long, default_value = "FIFO", env = "TESSERA_CACHE_POLICY")]
    cache_policy: String,

    /// coordinator heartbeat interval in milliseconds
    #[arg(long, default_value_t = 2000, env = "TESSERA_HEARTBEAT_MS")]
    heartbeat_ms: u64,

    /// maximum number of concurrent connections
    #[arg(long, default_value_t = 1000, env = "TESSERA_MAXCLIENTS")]
    maxclients: usize,
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info".into()),
        )
        .init();

    let args = Args::parse();

    let policy: CachePolicy = args
        .cache_policy
        .parse()
        .unwrap_or_else(|e| exit_err(format!("error: {e}")));

    let mut config = NodeConfig::new(args.host, args.port, args.data_dir)
        .with_cache(policy, args.cache_size)
        .with_heartbeat_interval(std::time::Duration::from_millis(args.heartbeat_ms));
    config.max_connections = args.maxclients;
    if let Some(coordinator) = args.coordinator {
        config = config.with_coordinator(coordinator);
    }

    let handle = match tessera_server::start(config).await {
        Ok(handle) => handle,
        Err(e) => exit_err(format!("failed to start node: {e}")),
    };

    if tokio::signal::ctrl_c().await.is_err() {
        exit_err("failed to listen for shutdown signal");
    }
    info!("shutdown signal received, leaving the ring");
    handle.close().await;
}
