//! Panic coordinator: bounded-time teardown of everything sensitive.
//!
//! `Idle --trigger--> Clearing --teardown--> Terminating`. Terminating
//! is terminal and absorbing; repeat triggers are no-ops because under
//! duress the panic control gets pressed more than once.
//!
//! Speed beats completeness on this path: every teardown step runs in
//! parallel under its own timeout, and a step that fails or hangs is
//! logged and abandoned rather than allowed to delay termination.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::join;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::events::{EventBus, StatusEvent};
use crate::proxy::ProxyRouter;
use crate::repository::SessionRepository;
use crate::tor::TorSupervisor;

/// Per-step bound on teardown work.
pub const DEFAULT_PANIC_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicState {
    Idle,
    Clearing,
    Terminating,
}

/// Runtime-side data clearing, implemented by the embedding layer.
///
/// Covers whatever the browser engine holds outside this crate:
/// cookies, local storage, HTTP cache.
#[async_trait]
pub trait RuntimeCleaner: Send + Sync {
    async fn clear_runtime_data(&self) -> anyhow::Result<()>;
}

/// Cleaner for embeddings that keep no runtime state.
pub struct NoopCleaner;

#[async_trait]
impl RuntimeCleaner for NoopCleaner {
    async fn clear_runtime_data(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Owner of the panic state machine.
pub struct PanicCoordinator {
    state: Mutex<PanicState>,
    router: Arc<ProxyRouter>,
    sessions: SessionRepository,
    supervisor: Arc<TorSupervisor>,
    cleaner: Arc<dyn RuntimeCleaner>,
    settings: Settings,
    events: EventBus,
    step_timeout: Duration,
}

impl PanicCoordinator {
    pub fn new(
        router: Arc<ProxyRouter>,
        sessions: SessionRepository,
        supervisor: Arc<TorSupervisor>,
        cleaner: Arc<dyn RuntimeCleaner>,
        settings: Settings,
        events: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(PanicState::Idle),
            router,
            sessions,
            supervisor,
            cleaner,
            settings,
            events,
            step_timeout: DEFAULT_PANIC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub async fn state(&self) -> PanicState {
        *self.state.lock().await
    }

    /// Run the teardown. Idempotent: a second call while clearing or
    /// terminated returns immediately.
    pub async fn trigger(&self) {
        {
            let mut state = self.state.lock().await;
            if *state != PanicState::Idle {
                debug!(state = ?*state, "panic already in progress, ignoring trigger");
                return;
            }
            *state = PanicState::Clearing;
        }

        warn!("panic triggered, clearing state");
        self.events.publish(StatusEvent::PanicStarted);

        let unbind = self.bounded_step("proxy unbind", async {
            self.router.unbind();
            Ok(())
        });
        let purge = self.bounded_step("session purge", async {
            self.sessions.purge_all().await?;
            Ok(())
        });
        let clear = self.bounded_step("runtime clear", self.cleaner.clear_runtime_data());
        let stop = self.bounded_step("tor stop", async {
            self.supervisor.stop().await;
            Ok(())
        });
        let settings = self.settings.clone();
        let wipe = self.bounded_step("cache wipe", async move {
            tokio::task::spawn_blocking(move || {
                wipe_directory(&settings.cache_dir())?;
                wipe_directory(&settings.temp_dir())
            })
            .await??;
            Ok(())
        });

        let outcomes = join!(unbind, purge, clear, stop, wipe);
        let clean = outcomes.0 && outcomes.1 && outcomes.2 && outcomes.3 && outcomes.4;

        {
            let mut state = self.state.lock().await;
            *state = PanicState::Terminating;
        }

        if clean {
            info!("panic teardown complete");
        } else {
            warn!("panic teardown finished with abandoned steps");
        }
        self.events.publish(StatusEvent::PanicFinished { clean });
        self.events.publish(StatusEvent::ExitRequested);
    }

    /// Trigger the teardown on SIGINT or SIGTERM.
    pub fn spawn_signal_triggers(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut interrupt = match signal(SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "cannot install SIGINT handler");
                        return;
                    }
                };
                let mut terminate = match signal(SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "cannot install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = interrupt.recv() => info!("SIGINT received, triggering panic"),
                    _ = terminate.recv() => info!("SIGTERM received, triggering panic"),
                }
                coordinator.trigger().await;
            }
            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, triggering panic");
                    coordinator.trigger().await;
                }
            }
        })
    }

    /// Await one teardown step, bounded. Returns whether it confirmed
    /// success inside the bound; failures and timeouts are swallowed.
    async fn bounded_step(
        &self,
        label: &'static str,
        step: impl std::future::Future<Output = anyhow::Result<()>>,
    ) -> bool {
        match tokio::time::timeout(self.step_timeout, step).await {
            Ok(Ok(())) => {
                debug!(step = label, "panic step done");
                true
            }
            Ok(Err(e)) => {
                warn!(step = label, error = %e, "panic step failed");
                false
            }
            Err(_) => {
                warn!(step = label, timeout = ?self.step_timeout, "panic step timed out, abandoning");
                false
            }
        }
    }
}

/// Delete a directory tree; a missing tree already counts as wiped.
fn wipe_directory(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
