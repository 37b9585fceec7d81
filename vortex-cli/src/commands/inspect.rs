//! Inspect command implementation

use anyhow::{Context, Result, bail};
use std::path::Path;
use vortex_core::{PortMapping, Protocol};
use vortex_network::inspect::{port_bindings, result_to_basic_network_config};
use vortex_network::{InspectNetworkSettings, NetResult};

/// Parse `HOST:CONTAINER[/PROTO]`
fn parse_publish(value: &str) -> Result<PortMapping> {
    let (ports, proto) = value.split_once('/').unwrap_or((value, "tcp"));
    let Some((host, container)) = ports.split_once(':') else {
        bail!("invalid port {value:?}, expected HOST:CONTAINER[/PROTO]");
    };

    let host = host
        .parse::<u16>()
        .with_context(|| format!("invalid host port in {value:?}"))?;
    let container = container
        .parse::<u16>()
        .with_context(|| format!("invalid container port in {value:?}"))?;
    let protocol: Protocol = proto.parse()?;

    Ok(PortMapping::tcp(host, container).with_protocol(protocol))
}

pub async fn execute(result: &Path, publish: &[String]) -> Result<()> {
    let raw = tokio::fs::read(result)
        .await
        .with_context(|| format!("Failed to read {}", result.display()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).context("Plugin result is not valid JSON")?;

    let parsed = NetResult::parse(&value)?;
    let mappings = publish
        .iter()
        .map(|value| parse_publish(value))
        .collect::<Result<Vec<_>>>()?;

    let settings = InspectNetworkSettings {
        basic: result_to_basic_network_config(&parsed)?,
        ports: port_bindings(&mappings),
        ..InspectNetworkSettings::default()
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish() {
        let mapping = parse_publish("8080:80").unwrap();
        assert_eq!(mapping, PortMapping::tcp(8080, 80));

        let mapping = parse_publish("5353:53/udp").unwrap();
        assert_eq!(mapping.protocol, Protocol::Udp);

        assert!(parse_publish("8080").is_err());
        assert!(parse_publish("x:80").is_err());
        assert!(parse_publish("1:2/icmp").is_err());
    }
}
