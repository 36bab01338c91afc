//! Persona management commands.

use std::io::Read;
use std::path::Path;

use console::style;

use crate::config::{Config, Settings};
use crate::models::PersonaProfile;
use crate::personas::{PersonaError, PersonaStore};

use super::helpers::truncate;

fn open_store(settings: &Settings, config: &Config) -> Result<PersonaStore, PersonaError> {
    PersonaStore::open(settings.personas_dir(), &config.default_persona)
}

/// List personas in the catalog.
pub async fn cmd_persona_list(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let store = open_store(settings, config)?;
    let personas = store.list();

    if personas.is_empty() {
        println!(
            "{} No personas in the catalog. Run 'veil init' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Personas").bold());
    println!("{}", "-".repeat(76));
    println!(
        "{:<15} {:<22} {:<10} {:<4} {:<6} Created",
        "ID", "Name", "Screen", "JS", "WebGL"
    );
    println!("{}", "-".repeat(76));

    for persona in personas {
        let marker = if persona.id == store.default_id() {
            "*"
        } else {
            " "
        };
        println!(
            "{:<14}{} {:<22} {:<10} {:<4} {:<6} {}",
            persona.id,
            marker,
            truncate(&persona.name, 21),
            persona.screen_resolution,
            if persona.javascript_enabled { "on" } else { "off" },
            if persona.webgl_enabled { "on" } else { "off" },
            persona.created_at.format("%Y-%m-%d"),
        );
    }
    println!("\n  * default persona");
    Ok(())
}

/// Show one persona in full.
pub async fn cmd_persona_show(
    settings: &Settings,
    config: &Config,
    id: &str,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings, config)?;
    let persona = match store.get(id) {
        Ok(persona) => persona,
        Err(PersonaError::NotFound(_)) => {
            println!("{} Persona '{}' not found", style("✗").red(), id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&persona)?);
        return Ok(());
    }

    println!("\n{}", style(&persona.name).bold());
    println!("  id                {}", persona.id);
    println!("  user agent        {}", persona.user_agent);
    println!("  accept language   {}", persona.accept_language);
    println!("  timezone          {}", persona.timezone);
    println!(
        "  screen            {} @ {}-bit",
        persona.screen_resolution, persona.color_depth
    );
    println!("  javascript        {}", on_off(persona.javascript_enabled));
    println!("  plugins           {}", on_off(persona.plugins_enabled));
    println!("  webgl             {}", on_off(persona.webgl_enabled));
    println!("  canvas noise      {}", on_off(persona.canvas_protection));
    println!("  audio noise       {}", on_off(persona.audio_protection));
    if !persona.description.is_empty() {
        println!("  description       {}", persona.description);
    }
    println!(
        "  created           {}",
        persona.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

/// Create a persona from a JSON profile file (or stdin with '-').
pub async fn cmd_persona_create(
    settings: &Settings,
    config: &Config,
    file: &Path,
) -> anyhow::Result<()> {
    let raw = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };
    let profile: PersonaProfile = serde_json::from_str(&raw)?;

    let mut store = open_store(settings, config)?;
    let persona = store.create(profile)?;
    println!(
        "{} Created persona '{}' ({})",
        style("✓").green(),
        persona.id,
        persona.name
    );
    Ok(())
}

/// Delete a persona from the catalog.
pub async fn cmd_persona_delete(
    settings: &Settings,
    config: &Config,
    id: &str,
    force: bool,
) -> anyhow::Result<()> {
    if id == config.default_persona && !force {
        println!(
            "{} '{}' is the default persona; change default_persona first or pass --force",
            style("✗").red(),
            id
        );
        return Ok(());
    }

    let mut store = open_store(settings, config)?;
    match store.delete(id, force) {
        Ok(()) => {
            println!("{} Deleted persona '{}'", style("✓").green(), id);
            Ok(())
        }
        Err(PersonaError::NotFound(_)) => {
            println!("{} Persona '{}' not found", style("✗").red(), id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
