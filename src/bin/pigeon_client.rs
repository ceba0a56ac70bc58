//! Pigeon Client Binary
//!
//! Cari `add2` dan `subtract2` di server, lalu panggil masing-masing
//! dua kali dengan operand (i, 100).
//!
//! Usage:
//!   cargo run --release --bin pigeon_client -- -i ::1 -p 3000

use std::process;

use clap::Parser;
use pigeon::{Client, Payload};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pigeon_client")]
#[command(about = "Call add2/subtract2 on a Pigeon RPC server")]
struct Args {
    /// Server IP address or hostname
    #[arg(short, long)]
    ip: String,

    /// Server port
    #[arg(short, long)]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

const RIGHT_OPERAND: i8 = 100;

fn run_ops(client: &mut Client, name: &str, verb: &str) -> pigeon::Result<()> {
    let handle = client.find(name)?;

    for left in 0..2i8 {
        let request = Payload::with_data(left as i64, vec![RIGHT_OPERAND as u8]);
        let response = client.call(handle, &request)?;

        if response.data2.is_some() {
            return Err(pigeon::RpcError::InvalidPayload(format!(
                "{name} returned unexpected data2"
            )));
        }
        println!(
            "Result of {} {} and {}: {}",
            verb, left, RIGHT_OPERAND, response.data1
        );
    }
    Ok(())
}

fn run_client(args: Args) -> pigeon::Result<()> {
    let mut client = Client::new(&args.ip, args.port)?;

    let res = run_ops(&mut client, "add2", "adding")
        .and_then(|_| run_ops(&mut client, "subtract2", "subtracting"));

    client.close();
    res
}

fn main() {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = run_client(args) {
        error!("Client error: {}", e);
        process::exit(1);
    }
}
