//! Environment probe command.

use console::style;

use crate::config::{Config, ConfigError, Settings};
use crate::personas::PersonaStore;
use crate::tor::{port_in_use, probe_socks, TorSupervisor};

/// Probe the environment: config file, tor binary, ports, persona
/// catalog, session database. Reports every finding, then fails if any
/// probe found a hard problem.
pub async fn cmd_check(
    settings: &Settings,
    config: Result<Config, ConfigError>,
) -> anyhow::Result<()> {
    println!("\n{}", style("Environment Check").bold());
    println!("{}", "-".repeat(50));

    let mut failures = 0;

    // Config root and file
    if settings.config_root.is_dir() {
        println!(
            "  {} config root {}",
            style("✓").green(),
            settings.config_root.display()
        );
    } else {
        println!(
            "  {} config root {} missing (run 'veil init')",
            style("!").yellow(),
            settings.config_root.display()
        );
    }

    let config = match config {
        Ok(config) => {
            if settings.config_path().exists() {
                println!("  {} config.json valid", style("✓").green());
            } else {
                println!("  {} config.json missing, using defaults", style("!").yellow());
            }
            config
        }
        Err(e) => {
            println!("  {} config.json unreadable: {}", style("✗").red(), e);
            failures += 1;
            Config::default()
        }
    };

    // Tor daemon prerequisites
    if config.tor.enabled {
        match TorSupervisor::find_tor_binary() {
            Some(path) => {
                println!("  {} tor binary {}", style("✓").green(), path.display());
            }
            None => {
                println!(
                    "  {} tor binary not found (install tor or set VEILSHELL_TOR_BINARY)",
                    style("✗").red()
                );
                failures += 1;
            }
        }

        for (label, port) in [
            ("SOCKS port", config.tor.socks_port),
            ("control port", config.tor.control_port),
        ] {
            if !port_in_use(port) {
                println!("  {} {} {} free", style("✓").green(), label, port);
            } else if probe_socks(([127, 0, 0, 1], port).into()).await {
                // A SOCKS speaker answering here is almost certainly a
                // Tor already running; usable via --tor-proxy.
                println!(
                    "  {} {} {} already serving SOCKS (adopt with --tor-proxy 127.0.0.1:{})",
                    style("!").yellow(),
                    label,
                    port,
                    port
                );
            } else {
                println!(
                    "  {} {} {} in use by another process",
                    style("✗").red(),
                    label,
                    port
                );
                failures += 1;
            }
        }
    } else {
        println!(
            "  {} tor disabled in config; traffic will not be anonymized",
            style("!").yellow()
        );
    }

    // Persona catalog
    match PersonaStore::open(settings.personas_dir(), &config.default_persona) {
        Ok(store) => {
            let count = store.list().len();
            if count == 0 {
                println!(
                    "  {} persona catalog empty (run 'veil init')",
                    style("!").yellow()
                );
            } else {
                println!("  {} {} personas in catalog", style("✓").green(), count);
            }
            if count > 0 && store.get(&config.default_persona).is_err() {
                println!(
                    "  {} default persona '{}' not in catalog",
                    style("✗").red(),
                    config.default_persona
                );
                failures += 1;
            }
        }
        Err(e) => {
            println!("  {} persona catalog unreadable: {}", style("✗").red(), e);
            failures += 1;
        }
    }

    // Session database
    if settings.session_db_path().exists() {
        println!("  {} session database present", style("✓").green());
    } else {
        println!(
            "  {} session database will be created on first run",
            style("!").yellow()
        );
    }

    println!();
    if failures > 0 {
        anyhow::bail!("environment check found {} problem(s)", failures);
    }
    println!("{} Environment looks good", style("✓").green());
    Ok(())
}
