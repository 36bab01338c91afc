//! Shell core runtime command.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::{Config, Settings};
use crate::events::{EventBus, StatusEvent};
use crate::guards;
use crate::models::{Session, Tab};
use crate::panic::{NoopCleaner, PanicCoordinator};
use crate::personas::PersonaStore;
use crate::proxy::ProxyRouter;
use crate::repository::{AsyncSqlitePool, SessionRepository};
use crate::tor::{TorSupervisor, DEFAULT_HEALTH_INTERVAL, DEFAULT_START_TIMEOUT};

use super::helpers::resolve_endpoint;

/// Start the shell core: supervise Tor, keep the router bound to the
/// circuit, record the startup session, and run until a panic trigger
/// tears everything down.
pub async fn cmd_run(
    settings: &Settings,
    config: &Config,
    start_url: Option<&str>,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let mut personas = PersonaStore::open(settings.personas_dir(), &config.default_persona)?;
    personas.seed_defaults()?;

    let sessions = SessionRepository::new(AsyncSqlitePool::from_path(&settings.session_db_path()));
    sessions.init_schema().await?;

    // Clear-on-exit runs at startup: a panic or kill on the previous run
    // may have skipped the orderly path.
    if config.security.clear_history_on_exit {
        let cleared = sessions.clear_histories().await?;
        if cleared > 0 {
            info!(tabs = cleared, "cleared saved histories from previous run");
        }
    }

    let events = EventBus::new();
    let supervisor = Arc::new(TorSupervisor::new(
        config.tor.clone(),
        settings.tor_data_dir(),
        events.clone(),
    ));
    let router = Arc::new(ProxyRouter::new()?);
    let _route_sync = router.spawn_route_sync(supervisor.subscribe());

    // Subscribe before anything can publish so no transition is missed
    let mut status_rx = events.subscribe();

    if config.tor.enabled {
        bring_up_tor(&supervisor, config).await?;
        let _health = supervisor.spawn_health_monitor(DEFAULT_HEALTH_INTERVAL);
    } else {
        println!(
            "{} Tor is disabled; traffic will not be anonymized",
            style("!").yellow()
        );
    }

    record_startup_session(&mut personas, &sessions, config, start_url).await?;

    let coordinator = Arc::new(PanicCoordinator::new(
        Arc::clone(&router),
        sessions.clone(),
        Arc::clone(&supervisor),
        Arc::new(NoopCleaner),
        settings.clone(),
        events.clone(),
    ));
    let _signals = coordinator.spawn_signal_triggers();

    println!(
        "{} veilshell core running (panic key {}; Ctrl+C triggers teardown)",
        style("→").cyan(),
        config.security.panic_key
    );

    loop {
        match status_rx.recv().await {
            Ok(StatusEvent::TorStatusChanged { status, endpoint }) => match endpoint {
                Some(endpoint) => info!(%status, %endpoint, "tor status changed"),
                None => info!(%status, "tor status changed"),
            },
            Ok(StatusEvent::CircuitRenewed { endpoint }) => {
                info!(%endpoint, "circuit renewed");
            }
            Ok(StatusEvent::PanicStarted) => {
                println!("{} Panic teardown started", style("!").yellow());
            }
            Ok(StatusEvent::PanicFinished { clean }) => {
                if clean {
                    println!("{} Panic teardown complete", style("✓").green());
                } else {
                    println!(
                        "{} Panic teardown finished with abandoned steps",
                        style("!").yellow()
                    );
                }
            }
            Ok(StatusEvent::ExitRequested) => break,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "status event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    println!("{} Shut down", style("✓").green());
    Ok(())
}

/// Bring the configured Tor endpoint up: adopt an external one, start a
/// supervised daemon, or leave it to a later manual start.
async fn bring_up_tor(supervisor: &Arc<TorSupervisor>, config: &Config) -> anyhow::Result<()> {
    if let Some(raw) = config.external_endpoint() {
        let endpoint = resolve_endpoint(&raw)?;
        println!(
            "{} Adopting external Tor endpoint {}",
            style("→").cyan(),
            endpoint
        );
        supervisor.adopt_external(endpoint).await?;
        println!("  {} Endpoint is answering SOCKS5", style("✓").green());
    } else if config.tor.auto_start {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Bootstrapping Tor circuit...");

        let started = supervisor.start(DEFAULT_START_TIMEOUT).await;
        pb.finish_and_clear();

        let endpoint = started?;
        println!(
            "{} Circuit established via {}",
            style("✓").green(),
            endpoint
        );
    } else {
        println!(
            "{} Tor enabled but not auto-started; pass --tor or set tor.auto_start",
            style("!").yellow()
        );
    }
    Ok(())
}

/// Record the startup session, with one tab when a start URL was given.
async fn record_startup_session(
    personas: &mut PersonaStore,
    sessions: &SessionRepository,
    config: &Config,
    start_url: Option<&str>,
) -> anyhow::Result<()> {
    let persona = personas.resolve_or_default(&config.default_persona)?;
    let mut session = Session::new(
        format!("startup {}", Utc::now().format("%Y-%m-%d %H:%M")),
        &persona.id,
    );
    let mut tab_list = Vec::new();

    if let Some(raw) = start_url {
        match url::Url::parse(raw) {
            Ok(parsed) => {
                let tab = Tab::new(&session.id, &persona.id, parsed.as_str());
                personas.register_tab(&tab.id, &persona.id)?;
                session.set_active_tab(&tab.id);

                let directives = guards::compile(&persona, guards::tab_seed(&tab.id));
                println!(
                    "{} Startup tab {} under persona '{}' ({} header rules, {} script guards)",
                    style("→").cyan(),
                    parsed,
                    persona.id,
                    directives.header_rules().count(),
                    directives.script_guards().count()
                );
                tab_list.push(tab);
            }
            Err(e) => {
                warn!("ignoring invalid --start URL '{}': {}", raw, e);
            }
        }
    }

    sessions.save(&session, &tab_list).await?;
    info!(session_id = %session.id, tabs = tab_list.len(), "recorded startup session");
    Ok(())
}
