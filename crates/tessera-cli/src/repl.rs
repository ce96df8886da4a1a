//! Interactive REPL.
//!
//! Uses rustyline for editing and history. Commands are parsed
//! client-side only enough to route them; the server has the last word.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use tessera_proto::{ClientRequest, ClientResponse, Status};

use crate::client::RoutingClient;

/// Runs the interactive loop. Blocks the calling thread; drives the
/// async client through a local runtime.
pub fn run_repl(addr: &str) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", format!("failed to create runtime: {e}").red());
            return;
        }
    };

    let mut client = match rt.block_on(RoutingClient::connect(addr)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", format!("could not connect to {addr}: {e}").red());
            return;
        }
    };

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}", format!("failed to create editor: {e}").red());
            return;
        }
    };

    loop {
        let prompt = format!("{}> ", client.addr());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match trimmed {
                    "quit" | "exit" => break,
                    "help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                let req = match ClientRequest::parse(trimmed) {
                    Ok(req) => req,
                    Err(e) => {
                        eprintln!("{}", format!("{e}").red());
                        continue;
                    }
                };
                match rt.block_on(client.execute(req)) {
                    Ok(resp) => println!("{}", format_response(&resp)),
                    Err(e) => eprintln!("{}", format!("error: {e}").red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", format!("input error: {e}").red());
                break;
            }
        }
    }
}

/// Colors the status word by outcome and appends the payload verbatim.
pub fn format_response(resp: &ClientResponse) -> String {
    let word = match resp.status {
        Status::GetSuccess
        | Status::PutSuccess
        | Status::PutUpdate
        | Status::DeleteSuccess
        | Status::KeyrangeSuccess
        | Status::KeyrangeReadSuccess => resp.status.as_str().green(),
        Status::ServerNotResponsible | Status::ServerWriteLock | Status::ServerStopped => {
            resp.status.as_str().yellow()
        }
        _ => resp.status.as_str().red(),
    };
    match &resp.payload {
        Some(payload) => format!("{word} {payload}"),
        None => word.to_string(),
    }
}

fn print_help() {
    println!("commands:");
    println!("  get <key>          look up a value");
    println!("  put <key> <value>  store a value");
    println!("  put <key> null     delete a key");
    println!("  keyrange           show the ring (owned ranges)");
    println!("  keyrange_read      show the ring (readable ranges)");
    println!("  quit               leave");
}
