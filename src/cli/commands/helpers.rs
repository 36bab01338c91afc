//! Helper utilities for CLI commands.

use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs};

use console::style;

/// Truncate a string to a maximum length, adding "..." if truncated.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max - 3])
    }
}

/// Ask for y/N confirmation unless it was already given on the command
/// line. Returns false when the user declines.
pub fn confirmed(prompt: &str, skip_prompt: bool) -> anyhow::Result<bool> {
    if skip_prompt {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    if input.trim().eq_ignore_ascii_case("y") {
        Ok(true)
    } else {
        println!("{} Cancelled", style("!").yellow());
        Ok(false)
    }
}

/// Resolve a `host:port` endpoint string to a socket address.
pub fn resolve_endpoint(raw: &str) -> anyhow::Result<SocketAddr> {
    raw.to_socket_addrs()
        .map_err(|e| anyhow::anyhow!("invalid endpoint '{}': {}", raw, e))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("endpoint '{}' did not resolve", raw))
}
