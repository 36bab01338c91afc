//! Tor endpoint commands.

use std::net::SocketAddr;

use console::style;

use crate::config::Config;
use crate::tor::{probe_control, probe_socks, ControlClient};

use super::helpers::resolve_endpoint;

/// Probe the configured endpoint and report whether it answers.
pub async fn cmd_tor_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let external = config.external_endpoint();
    let (endpoint, control_port): (SocketAddr, Option<u16>) = match &external {
        Some(raw) => (resolve_endpoint(raw)?, None),
        None => (
            ([127, 0, 0, 1], config.tor.socks_port).into(),
            Some(config.tor.control_port),
        ),
    };

    let socks_listening = probe_socks(endpoint).await;
    let control_listening = match control_port {
        Some(port) => Some(probe_control(port).await),
        None => None,
    };

    if json {
        let report = serde_json::json!({
            "enabled": config.tor.enabled,
            "endpoint": endpoint.to_string(),
            "external": external.is_some(),
            "socks_listening": socks_listening,
            "control_port": control_port,
            "control_listening": control_listening,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}", style("Tor Status").bold());
    println!("{}", "-".repeat(50));
    let kind = if external.is_some() {
        "external"
    } else {
        "supervised"
    };
    println!("  endpoint   {} ({})", endpoint, kind);

    if socks_listening {
        println!("  {} SOCKS5 listener answering", style("✓").green());
    } else {
        println!("  {} no SOCKS listener at {}", style("✗").red(), endpoint);
    }

    if let (Some(port), Some(listening)) = (control_port, control_listening) {
        if listening {
            println!("  {} control port {} answering", style("✓").green(), port);
        } else {
            println!("  {} control port {} not answering", style("✗").red(), port);
        }
    }

    if !socks_listening {
        println!(
            "\n{} start with 'veil run --tor' or adopt an external endpoint with --tor-proxy",
            style("→").cyan()
        );
    }
    Ok(())
}

/// Ask the supervised daemon for a fresh circuit.
pub async fn cmd_tor_renew(config: &Config) -> anyhow::Result<()> {
    if config.external_endpoint().is_some() {
        anyhow::bail!("an externally managed endpoint exposes no control port");
    }

    let mut control = ControlClient::connect(config.tor.control_port).await?;
    control.authenticate().await?;
    control.signal_newnym().await?;
    control.quit().await;

    println!("{} Requested a fresh circuit", style("✓").green());
    Ok(())
}
