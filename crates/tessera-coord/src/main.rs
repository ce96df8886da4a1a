use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tessera_cluster::{Coordinator, CoordinatorService};
use tessera_proto::ServerInfo;

#[derive(Parser)]
#[command(name = "tessera-coord", about = "tessera cluster coordinator")]
struct Args {
    /// advertised host, the address members heartbeat against
    #[arg(long, default_value = "127.0.0.1", env = "TESSERA_HOST")]
    host: String,

    /// port to listen on
    #[arg(short, long, default_value_t = 41000, env = "TESSERA_PORT")]
    port: u16,
}

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
    let info = ServerInfo::new(args.host.clone(), args.port);
    let coordinator = Arc::new(Coordinator::new(info));

    let bind = format!("{}:{}", args.host, args.port);
    let service = match CoordinatorService::bind(&bind, coordinator).await {
        Ok(service) => service,
        Err(e) => exit_err(format!("failed to bind {bind}: {e}")),
    };

    tokio::select! {
        _ = service.run() => {}
        result = tokio::signal::ctrl_c() => {
            if result.is_err() {
                exit_err("failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
    }
}
