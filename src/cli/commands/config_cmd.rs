//! Configuration commands.

use console::style;

use crate::config::{Config, Settings};

/// Keys recognized by `config get` and `config set`.
const KEYS: [&str; 9] = [
    "tor.enabled",
    "tor.socks_port",
    "tor.control_port",
    "tor.auto_start",
    "tor.exit_countries",
    "security.panic_key",
    "security.clear_history_on_exit",
    "security.disable_javascript",
    "default_persona",
];

/// Print every recognized option with its effective value.
pub async fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    println!("\n{}", style("Configuration").bold());
    println!("{}", "-".repeat(50));
    for key in KEYS {
        if let Some(value) = config.get(key) {
            println!("{:<32} {}", key, render(&value));
        }
    }
    Ok(())
}

/// Print a single option value.
pub async fn cmd_config_get(config: &Config, key: &str) -> anyhow::Result<()> {
    match config.get(key) {
        Some(value) => {
            println!("{}", render(&value));
            Ok(())
        }
        None => anyhow::bail!("unknown configuration option: {}", key),
    }
}

/// Change one option and write the config file back.
pub async fn cmd_config_set(settings: &Settings, key: &str, value: &str) -> anyhow::Result<()> {
    // Reload from disk so env and CLI overrides are not written back.
    let path = settings.config_path();
    let mut config = if path.exists() {
        Config::load_from_path(&path)?
    } else {
        Config::default()
    };

    config.set(key, parse_value(value))?;
    settings.ensure_directories()?;
    config.save(settings)?;

    if let Some(stored) = config.get(key) {
        println!("{} {} = {}", style("✓").green(), key, render(&stored));
    }
    Ok(())
}

/// Interpret the raw argument as JSON where possible, falling back to a
/// bare string. Lets booleans, numbers, and lists come in unquoted.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value_literals() {
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("9052"), json!(9052));
        assert_eq!(parse_value("[\"de\",\"nl\"]"), json!(["de", "nl"]));
    }

    #[test]
    fn test_parse_value_bare_string() {
        assert_eq!(parse_value("Ctrl+Shift+X"), json!("Ctrl+Shift+X"));
    }

    #[test]
    fn test_render_strings_unquoted() {
        assert_eq!(render(&json!("anonymous")), "anonymous");
        assert_eq!(render(&json!(false)), "false");
        assert_eq!(render(&json!(["de", "nl"])), "[\"de\",\"nl\"]");
    }

    #[test]
    fn test_every_key_readable_on_defaults() {
        let config = Config::default();
        for key in KEYS {
            assert!(config.get(key).is_some(), "missing key {}", key);
        }
    }
}
