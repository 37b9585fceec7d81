use crate::cli::{Commands, NetnsAction};
use anyhow::Result;

pub mod inspect;
pub mod netns;
pub mod probe;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Probe { path } => probe::execute(path.as_deref()).await,

        Commands::Netns { action } => match action {
            NetnsAction::Create { runtime_dir } => netns::create(runtime_dir),
            NetnsAction::Remove { path, runtime_dir } => netns::remove(&path, runtime_dir),
        },

        Commands::Inspect { result, publish } => inspect::execute(&result, &publish).await,

        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn print_version() {
    println!("Vortex Container Networking");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Features:");
    println!("  • Network namespace lifecycle");
    println!("  • slirp4netns rootless networking");
    println!("  • rootlessport host port forwarding");
}
