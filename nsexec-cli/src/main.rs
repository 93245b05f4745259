//! nsexec command-line interface
//!
//! `nsexec serve` runs the daemon inside the container; `nsexec exec` is
//! the host-side client that submits one process and relays its streams.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod exec;
mod serve;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag when set.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Serve(args) => serve::execute(args).await.map(|()| 0),
        Commands::Exec(args) => exec::execute(args).await,
        Commands::Version => {
            print_version();
            Ok(0)
        }
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn print_version() {
    println!("nsexec {}", env!("CARGO_PKG_VERSION"));
    println!("Edition: Rust 2024");
    println!("Protocol: JSON request, 4 descriptors via SCM_RIGHTS");
}
