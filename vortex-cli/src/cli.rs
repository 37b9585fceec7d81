//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vortex")]
#[command(about = "Vortex container networking", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which flags the installed slirp4netns supports
    Probe {
        /// Emulator binary (default: slirp4netns on PATH)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Manage persistent network namespaces
    Netns {
        #[command(subcommand)]
        action: NetnsAction,
    },

    /// Translate a network plugin result into inspect output
    Inspect {
        /// File holding the plugin result JSON
        result: PathBuf,

        /// Published port, HOST:CONTAINER[/PROTO]
        #[arg(short, long)]
        publish: Vec<String>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum NetnsAction {
    /// Create a namespace and print its path
    Create {
        /// Directory holding the bind mounts
        #[arg(long)]
        runtime_dir: Option<PathBuf>,
    },

    /// Unmount a namespace created by `netns create`
    Remove {
        /// Namespace path
        path: PathBuf,

        /// Directory holding the bind mounts
        #[arg(long)]
        runtime_dir: Option<PathBuf>,
    },
}
