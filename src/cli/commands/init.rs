//! Initialize command.

use console::style;

use crate::config::{Config, Settings};
use crate::personas::PersonaStore;
use crate::repository::{AsyncSqlitePool, SessionRepository};

/// Initialize the config root: directory layout, config file, default
/// personas, and the session database.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    // Write the config file on first run so the recognized keys are
    // visible and editable.
    if !settings.config_path().exists() {
        config.save(settings)?;
        println!(
            "  {} Wrote {}",
            style("✓").green(),
            settings.config_path().display()
        );
    }

    let mut personas = PersonaStore::open(settings.personas_dir(), &config.default_persona)?;
    let seeded = personas.seed_defaults()?;
    if seeded > 0 {
        println!("  {} Seeded {} default personas", style("✓").green(), seeded);
    } else {
        println!(
            "  {} Persona catalog already has {} personas",
            style("✓").green(),
            personas.list().len()
        );
    }

    let sessions = SessionRepository::new(AsyncSqlitePool::from_path(&settings.session_db_path()));
    sessions.init_schema().await?;
    println!("  {} Session database ready", style("✓").green());

    println!(
        "{} Initialized veilshell in {}",
        style("✓").green(),
        settings.config_root.display()
    );

    Ok(())
}
