//! Standalone panic teardown command.

use std::sync::Arc;

use console::style;

use crate::config::{Config, Settings};
use crate::events::{EventBus, StatusEvent};
use crate::panic::{NoopCleaner, PanicCoordinator};
use crate::proxy::ProxyRouter;
use crate::repository::{AsyncSqlitePool, SessionRepository};
use crate::tor::TorSupervisor;

use super::helpers::confirmed;

/// Run the panic teardown outside a live shell: purge every saved
/// session and wipe the cache and scratch directories.
pub async fn cmd_panic(settings: &Settings, config: &Config, confirm: bool) -> anyhow::Result<()> {
    println!(
        "{} This deletes every saved session and wipes {} and {}",
        style("!").yellow(),
        settings.cache_dir().display(),
        settings.temp_dir().display(),
    );
    if !confirmed("Proceed?", confirm)? {
        return Ok(());
    }

    settings.ensure_directories()?;
    let sessions = SessionRepository::new(AsyncSqlitePool::from_path(&settings.session_db_path()));
    sessions.init_schema().await?;

    let events = EventBus::new();
    let supervisor = Arc::new(TorSupervisor::new(
        config.tor.clone(),
        settings.tor_data_dir(),
        events.clone(),
    ));
    let router = Arc::new(ProxyRouter::new()?);

    // Subscribe before triggering so the finished event cannot be missed.
    let mut rx = events.subscribe();
    let coordinator = PanicCoordinator::new(
        router,
        sessions,
        supervisor,
        Arc::new(NoopCleaner),
        settings.clone(),
        events,
    );
    coordinator.trigger().await;

    let mut clean = true;
    while let Ok(event) = rx.try_recv() {
        if let StatusEvent::PanicFinished {
            clean: finished_clean,
        } = event
        {
            clean = finished_clean;
        }
    }

    if clean {
        println!("{} Teardown complete", style("✓").green());
    } else {
        println!(
            "{} Teardown finished with abandoned steps",
            style("!").yellow()
        );
    }
    Ok(())
}
