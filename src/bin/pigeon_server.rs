//! Pigeon Server Binary
//!
//! Demo server dengan dua function: `add2` dan `subtract2`.
//! Keduanya menerima operand kiri di data1 dan operand kanan (i8) di data2[0].
//!
//! Usage:
//!   cargo run --release --bin pigeon_server -- -p 3000

use std::process;

use clap::Parser;
use pigeon::{Payload, Server, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pigeon_server")]
#[command(about = "Serve add2/subtract2 over the Pigeon RPC protocol")]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "::")]
    host: String,

    /// Reject CALL payloads with more data2 bytes than this
    #[arg(long, default_value_t = u32::MAX)]
    max_payload: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Parse operands: data1 dan satu byte data2, keduanya signed 8-bit
fn operands(input: &Payload) -> Option<(i8, i8)> {
    match input.data2.as_deref() {
        Some([rhs]) => Some((input.data1 as i8, *rhs as i8)),
        _ => None,
    }
}

fn add2(input: &Payload) -> Option<Payload> {
    let (lhs, rhs) = operands(input)?;
    info!("add2: arguments {} and {}", lhs, rhs);
    Some(Payload::scalar(lhs as i64 + rhs as i64))
}

fn subtract2(input: &Payload) -> Option<Payload> {
    let (lhs, rhs) = operands(input)?;
    info!("subtract2: arguments {} and {}", lhs, rhs);
    Some(Payload::scalar(lhs as i64 - rhs as i64))
}

fn run_server(args: Args) -> pigeon::Result<()> {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_payload_len: args.max_payload,
        ..ServerConfig::default()
    };

    let mut server = Server::bind(config)?;
    server.register("add2", add2)?;
    server.register("subtract2", subtract2)?;

    // Ctrl-C menghentikan accept loop; gagal install handler = gagal startup
    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        handle.shutdown();
    })
    .map_err(|e| pigeon::RpcError::InvalidInput(format!("cannot install signal handler: {e}")))?;

    server.serve()
}

fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = run_server(args) {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
