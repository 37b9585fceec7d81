//! Probe command implementation

use anyhow::{Context, Result};
use std::path::Path;

pub async fn execute(path: Option<&Path>) -> Result<()> {
    let (binary, features) = vortex_network::slirp::probe(path)
        .await
        .context("Failed to probe slirp4netns")?;

    tracing::debug!(binary = %binary.display(), "Probed emulator");

    let report = serde_json::json!({
        "binary": binary,
        "features": features,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
