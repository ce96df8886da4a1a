//! tessera-cli: interactive command-line client for tessera.
//!
//! Connects to any node, learns the ring from it, and routes each
//! command to the right owner. Supports one-shot and interactive
//! (REPL) modes.

mod client;
mod connection;
mod repl;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use tessera_proto::ClientRequest;

use crate::client::RoutingClient;

/// Interactive CLI client for tessera.
#[derive(Parser)]
#[command(name = "tessera-cli", version, about)]
struct Args {
    /// Node hostname.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Node port.
    #[arg(short, long)]
    port: u16,

    /// Command to execute (one-shot mode). If omitted, starts the REPL.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    if args.command.is_empty() {
        repl::run_repl(&addr);
        ExitCode::SUCCESS
    } else {
        run_oneshot(&addr, &args.command.join(" "))
    }
}

/// Sends a single command and prints the response.
fn run_oneshot(addr: &str, command: &str) -> ExitCode {
    let req = match ClientRequest::parse(command) {
        Ok(req) => req,
        Err(e) => {
            eprintln!("{}", format!("{e}").red());
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", format!("failed to create runtime: {e}").red());
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async {
        let mut client = match RoutingClient::connect(addr).await {
            Ok(client) => client,
            Err(e) => {
                eprintln!("{}", format!("could not connect to {addr}: {e}").red());
                return ExitCode::FAILURE;
            }
        };
        match client.execute(req).await {
            Ok(resp) => {
                println!("{}", repl::format_response(&resp));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", format!("error: {e}").red());
                ExitCode::FAILURE
            }
        }
    })
}
