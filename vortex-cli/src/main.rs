//! Vortex Container Networking CLI
//!
//! Also serves as the rootless port forwarding helper when started with
//! `argv[0]` set to `rootlessport`.

use clap::Parser;
use std::ffi::OsStr;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;
use vortex_network::portforward::{self, REEXEC_KEY};

mod cli;
mod commands;

use cli::Cli;

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn invoked_as_helper() -> bool {
    std::env::args_os()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .is_some_and(|name| name == OsStr::new(REEXEC_KEY))
}

/// Helper mode: stderr carries the log, stdout only a final error message
async fn run_helper() {
    init_logging("debug");

    if let Err(e) = portforward::run_helper(std::io::stdin().lock()).await {
        println!("{e}");
        process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    if invoked_as_helper() {
        run_helper().await;
        return;
    }

    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    if let Err(e) = commands::dispatch(cli.command).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
