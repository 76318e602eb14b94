use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smscsim::simulator::{console, Simulator};
use smscsim::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "smscsim")]
#[command(author, version, about = "Interactive SMPP endpoint simulator")]
struct Args {
    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 2775)]
    port: u16,

    /// Path to the users file
    #[arg(short, long, value_name = "FILE", default_value = "users.txt")]
    users: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&TracingConfig {
        log_level: args.log_level.clone(),
        json_logs: args.json_logs,
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        users = %args.users.display(),
        "starting smscsim"
    );

    let mut sim = Simulator::new(args.port, args.users);

    match sim.start().await {
        Ok(addr) => println!("listening on {addr}"),
        // Not fatal: the operator can fix the port clash and start again
        // from the console.
        Err(e) => println!("{e}"),
    }

    console::run(&mut sim).await?;

    Ok(())
}
