//! Session store commands.

use console::style;

use crate::config::Settings;
use crate::repository::{AsyncSqlitePool, SessionRepository, SessionStoreError};

use super::helpers::{confirmed, truncate};

async fn open_repo(settings: &Settings) -> anyhow::Result<SessionRepository> {
    settings.ensure_directories()?;
    let repo = SessionRepository::new(AsyncSqlitePool::from_path(&settings.session_db_path()));
    repo.init_schema().await?;
    Ok(repo)
}

/// List saved sessions.
pub async fn cmd_session_list(settings: &Settings) -> anyhow::Result<()> {
    let repo = open_repo(settings).await?;
    let summaries = repo.list_sessions().await?;

    if summaries.is_empty() {
        println!("{} No saved sessions", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Sessions").bold());
    println!("{}", "-".repeat(100));
    println!(
        "{:<36} {:<20} {:<14} {:>4}  Last Accessed",
        "ID", "Name", "Persona", "Tabs"
    );
    println!("{}", "-".repeat(100));

    for summary in summaries {
        println!(
            "{:<36} {:<20} {:<14} {:>4}  {}",
            summary.session.id,
            truncate(&summary.session.name, 19),
            truncate(&summary.session.persona_id, 13),
            summary.tab_count,
            summary.session.last_accessed.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

/// Show one session with its tabs.
pub async fn cmd_session_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let repo = open_repo(settings).await?;
    let (session, tab_list) = match repo.load(id).await {
        Ok(loaded) => loaded,
        Err(SessionStoreError::NotFound(_)) => {
            println!("{} Session '{}' not found", style("✗").red(), id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n{}", style(&session.name).bold());
    println!("  id             {}", session.id);
    println!("  persona        {}", session.persona_id);
    println!(
        "  created        {}",
        session.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  last accessed  {}",
        session.last_accessed.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(active) = session.active_tab() {
        println!("  active tab     {}", active);
    }

    if tab_list.is_empty() {
        println!("\n{} no tabs", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", "-".repeat(100));
    println!("{:<36} {:<40} {:>7}  Title", "Tab", "URL", "History");
    println!("{}", "-".repeat(100));
    for tab in tab_list {
        println!(
            "{:<36} {:<40} {:>7}  {}",
            tab.id,
            truncate(&tab.url, 39),
            tab.history.len(),
            truncate(&tab.title, 24),
        );
    }
    Ok(())
}

/// Delete one session and its tabs.
pub async fn cmd_session_delete(settings: &Settings, id: &str, confirm: bool) -> anyhow::Result<()> {
    if !confirmed(&format!("Delete session '{}' and its tabs?", id), confirm)? {
        return Ok(());
    }

    let repo = open_repo(settings).await?;
    if repo.delete(id).await? {
        println!("{} Deleted session '{}'", style("✓").green(), id);
    } else {
        println!("{} Session '{}' not found", style("✗").red(), id);
    }
    Ok(())
}

/// Remove sessions not accessed within the retention window.
pub async fn cmd_session_cleanup(settings: &Settings, days: u32) -> anyhow::Result<()> {
    let repo = open_repo(settings).await?;
    let removed = repo.cleanup_older_than(i64::from(days)).await?;
    if removed == 0 {
        println!("{} No sessions older than {} days", style("✓").green(), days);
    } else {
        println!(
            "{} Removed {} session(s) not accessed in {} days",
            style("✓").green(),
            removed,
            days
        );
    }
    Ok(())
}
