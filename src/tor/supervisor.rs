//! Tor daemon lifecycle supervisor.
//!
//! Owns the spawned `tor` process and the published circuit state.
//! Transitions: `Stopped --start--> Starting --health--> Connected`;
//! `Connected --renew--> Renewing --health--> Connected`; three failed
//! health checks or a dead daemon yield `Failed`; `stop` reaches
//! `Stopped` from anywhere. Anything else is rejected.
//!
//! The internal mutex is held only for state edits, never across the
//! bootstrap wait, so `stop()` stays responsive while a slow start is
//! in flight. Interrupted operations detect the status change when they
//! re-acquire the lock and bail out instead of clobbering it.

use std::fs;
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::control::{probe_control, ControlClient};
use super::{probe_socks, TorError, TorStateSnapshot, TorStatus};
use crate::config::TorConfig;
use crate::events::{EventBus, StatusEvent};

/// Default bound on `start()` before the one extra poll.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);

/// Default spacing of the background health poller.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive probe failures before `Connected` degrades to `Failed`.
const MAX_HEALTH_FAILURES: u32 = 3;

/// Minimum spacing between successful circuit renewals.
const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(10);

/// SIGTERM grace before SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

const BOOTSTRAP_POLL: Duration = Duration::from_millis(500);

struct Inner {
    process: Option<Child>,
    /// Endpoint is managed by someone else; never spawn or kill.
    external: bool,
    last_renewal: Option<Instant>,
    health_failures: u32,
}

/// Supervisor for the external Tor daemon.
pub struct TorSupervisor {
    config: TorConfig,
    data_dir: PathBuf,
    events: EventBus,
    state_tx: watch::Sender<TorStateSnapshot>,
    renewal_interval: Duration,
    inner: Mutex<Inner>,
}

impl TorSupervisor {
    pub fn new(config: TorConfig, data_dir: impl Into<PathBuf>, events: EventBus) -> Self {
        let (state_tx, _) = watch::channel(TorStateSnapshot::default());
        Self {
            config,
            data_dir: data_dir.into(),
            events,
            state_tx,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            inner: Mutex::new(Inner {
                process: None,
                external: false,
                last_renewal: None,
                health_failures: 0,
            }),
        }
    }

    /// Override the renewal throttle. Clamped to at least one second;
    /// the daemon itself rate-limits NEWNYM below that.
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Find the tor binary in PATH or at a configured location.
    pub fn find_tor_binary() -> Option<PathBuf> {
        if let Ok(configured) = std::env::var("VEILSHELL_TOR_BINARY") {
            let path = PathBuf::from(configured);
            if path.exists() {
                return Some(path);
            }
        }

        let candidates = if cfg!(windows) {
            vec!["tor.exe"]
        } else {
            vec!["tor", "/usr/bin/tor", "/usr/local/bin/tor"]
        };

        for candidate in candidates {
            if let Ok(path) = which::which(candidate) {
                return Some(path);
            }
        }

        None
    }

    /// Check if a tor binary is available on this system.
    pub fn is_available() -> bool {
        Self::find_tor_binary().is_some()
    }

    /// Subscribe to atomic circuit-state publications.
    pub fn subscribe(&self) -> watch::Receiver<TorStateSnapshot> {
        self.state_tx.subscribe()
    }

    /// Current circuit state.
    pub fn snapshot(&self) -> TorStateSnapshot {
        self.state_tx.borrow().clone()
    }

    /// Current SOCKS endpoint, if routable.
    pub fn socks_endpoint(&self) -> Option<SocketAddr> {
        self.state_tx.borrow().socks_endpoint
    }

    /// Launch the daemon and wait for it to become healthy.
    ///
    /// Returns the SOCKS endpoint on success. On timeout the daemon is
    /// polled once more before `Failed` is declared, so a slow but
    /// successful bootstrap is not mis-declared.
    pub async fn start(&self, wait: Duration) -> Result<SocketAddr, TorError> {
        let socks_port = self.config.socks_port;
        let control_port = self.config.control_port;
        let endpoint = SocketAddr::from(([127, 0, 0, 1], socks_port));
        let bootstrapped = Arc::new(AtomicBool::new(false));

        {
            let mut inner = self.inner.lock().await;
            let status = self.state_tx.borrow().status;
            if !matches!(status, TorStatus::Stopped | TorStatus::Failed) {
                return Err(TorError::InvalidTransition { status });
            }

            let binary = Self::find_tor_binary().ok_or(TorError::BinaryNotFound)?;

            // A foreign listener on either port means we must not spawn;
            // status stays where it was.
            if port_in_use(socks_port) {
                return Err(TorError::PortInUse(socks_port));
            }
            if port_in_use(control_port) {
                return Err(TorError::PortInUse(control_port));
            }

            fs::create_dir_all(&self.data_dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.data_dir, fs::Permissions::from_mode(0o700))?;
            }

            let torrc_path = self.data_dir.join("torrc");
            fs::write(
                &torrc_path,
                generate_torrc(
                    &self.data_dir,
                    socks_port,
                    control_port,
                    &self.config.exit_countries,
                ),
            )?;

            info!(socks_port, control_port, "starting tor daemon");
            debug!(torrc = %torrc_path.display(), "tor configuration written");
            self.publish(TorStatus::Starting, None);

            let mut process = match Command::new(&binary)
                .arg("-f")
                .arg(&torrc_path)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
            {
                Ok(process) => process,
                Err(e) => {
                    self.publish(TorStatus::Failed, None);
                    return Err(TorError::Io(e));
                }
            };

            if let Some(stderr) = process.stderr.take() {
                let flag = bootstrapped.clone();
                tokio::task::spawn_blocking(move || {
                    let reader = BufReader::new(stderr);
                    for line in reader.lines().map_while(Result::ok) {
                        if line.contains("Bootstrapped 100%") {
                            flag.store(true, Ordering::SeqCst);
                        }
                        if line.contains("[warn]") || line.contains("[err]") {
                            warn!("tor: {line}");
                        } else {
                            debug!("tor: {line}");
                        }
                    }
                });
            }

            inner.process = Some(process);
            inner.external = false;
            inner.health_failures = 0;
        }

        // Lock released: poll for bootstrap within the caller's budget.
        let started = Instant::now();
        let mut healthy = false;
        while started.elapsed() < wait {
            match self.startup_poll(&bootstrapped, control_port).await? {
                StartupPoll::Healthy => {
                    healthy = true;
                    break;
                }
                StartupPoll::Died => break,
                StartupPoll::Pending => tokio::time::sleep(BOOTSTRAP_POLL).await,
            }
        }

        if !healthy {
            // One extra poll past the deadline
            healthy = matches!(
                self.startup_poll(&bootstrapped, control_port).await?,
                StartupPoll::Healthy
            );
        }

        let mut inner = self.inner.lock().await;
        let status = self.state_tx.borrow().status;
        if status != TorStatus::Starting {
            // stop() or a panic teardown intervened
            return Err(TorError::InvalidTransition { status });
        }

        if healthy {
            inner.health_failures = 0;
            self.publish(TorStatus::Connected, Some(endpoint));
            info!(%endpoint, "tor connected");
            Ok(endpoint)
        } else {
            warn!(waited = ?wait, "tor did not become healthy, giving up");
            terminate(&mut inner.process).await;
            self.publish(TorStatus::Failed, None);
            Err(TorError::StartTimeout(wait))
        }
    }

    /// Adopt an externally managed SOCKS endpoint instead of spawning.
    ///
    /// The endpoint is probed once; the supervisor will health-check it
    /// but never signal or kill anything behind it.
    pub async fn adopt_external(&self, endpoint: SocketAddr) -> Result<(), TorError> {
        let mut inner = self.inner.lock().await;
        let status = self.state_tx.borrow().status;
        if !matches!(status, TorStatus::Stopped | TorStatus::Failed) {
            return Err(TorError::InvalidTransition { status });
        }

        self.publish(TorStatus::Starting, None);
        if probe_socks(endpoint).await {
            inner.external = true;
            inner.health_failures = 0;
            self.publish(TorStatus::Connected, Some(endpoint));
            info!(%endpoint, "adopted external socks endpoint");
            Ok(())
        } else {
            self.publish(TorStatus::Failed, None);
            warn!(%endpoint, "external socks endpoint did not answer");
            Err(TorError::NotConnected)
        }
    }

    /// Request fresh circuits.
    ///
    /// `last_renewal_at` in the published snapshot moves only when the
    /// daemon accepts the signal.
    pub async fn renew(&self) -> Result<(), TorError> {
        let endpoint = {
            let inner = self.inner.lock().await;
            let snapshot = self.state_tx.borrow().clone();
            if snapshot.status != TorStatus::Connected {
                return Err(TorError::NotConnected);
            }
            if inner.external {
                return Err(TorError::Control(
                    "externally managed endpoint exposes no control port".to_string(),
                ));
            }
            if let Some(last) = inner.last_renewal {
                let since = last.elapsed();
                if since < self.renewal_interval {
                    return Err(TorError::RenewalThrottled {
                        retry_after: self.renewal_interval - since,
                    });
                }
            }
            self.publish(TorStatus::Renewing, snapshot.socks_endpoint);
            snapshot.socks_endpoint
        };

        let exchange = async {
            let mut client = ControlClient::connect(self.config.control_port).await?;
            client.authenticate().await?;
            client.signal_newnym().await?;
            client.quit().await;
            Ok::<(), TorError>(())
        }
        .await;

        let mut inner = self.inner.lock().await;
        let status = self.state_tx.borrow().status;
        if status != TorStatus::Renewing {
            return Err(TorError::InvalidTransition { status });
        }

        match exchange {
            Ok(()) => {
                inner.last_renewal = Some(Instant::now());
                self.state_tx.send_replace(TorStateSnapshot {
                    status: TorStatus::Connected,
                    socks_endpoint: endpoint,
                    last_renewal_at: Some(Utc::now()),
                });
                self.events.publish(StatusEvent::TorStatusChanged {
                    status: TorStatus::Connected,
                    endpoint,
                });
                if let Some(endpoint) = endpoint {
                    self.events.publish(StatusEvent::CircuitRenewed { endpoint });
                }
                info!("tor circuit renewed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "circuit renewal failed");
                if probe_control(self.config.control_port).await {
                    // Control channel still answers; the circuit stands
                    self.publish(TorStatus::Connected, endpoint);
                } else {
                    terminate(&mut inner.process).await;
                    self.publish(TorStatus::Failed, None);
                }
                Err(e)
            }
        }
    }

    /// Terminate the daemon. Idempotent; always succeeds.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.external {
            inner.external = false;
            info!("detaching from external socks endpoint");
        } else if inner.process.is_some() {
            info!("stopping tor daemon");
        }
        terminate(&mut inner.process).await;
        inner.last_renewal = None;
        inner.health_failures = 0;
        if self.state_tx.borrow().status != TorStatus::Stopped {
            self.publish(TorStatus::Stopped, None);
        }
    }

    /// Probe the SOCKS endpoint once.
    ///
    /// Three consecutive failures (or a reaped daemon) degrade
    /// `Connected` to `Failed` and publish the transition.
    pub async fn health_check(&self) -> bool {
        let snapshot = self.snapshot();
        match snapshot.status {
            TorStatus::Connected => {}
            // Renewal in flight is not a failure
            TorStatus::Renewing => return true,
            _ => return false,
        }
        let Some(endpoint) = snapshot.socks_endpoint else {
            return false;
        };

        let mut inner = self.inner.lock().await;

        if !inner.external {
            if let Some(process) = inner.process.as_mut() {
                if let Ok(Some(code)) = process.try_wait() {
                    warn!(exit = %code, "tor daemon exited unexpectedly");
                    inner.process = None;
                    self.publish(TorStatus::Failed, None);
                    return false;
                }
            }
        }

        if probe_socks(endpoint).await {
            inner.health_failures = 0;
            true
        } else {
            inner.health_failures += 1;
            warn!(
                failures = inner.health_failures,
                "socks endpoint health probe failed"
            );
            if inner.health_failures >= MAX_HEALTH_FAILURES {
                terminate(&mut inner.process).await;
                self.publish(TorStatus::Failed, None);
            }
            false
        }
    }

    /// Spawn the background health poller.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status = supervisor.snapshot().status;
                if status == TorStatus::Connected {
                    supervisor.health_check().await;
                }
            }
        })
    }

    async fn startup_poll(
        &self,
        bootstrapped: &AtomicBool,
        control_port: u16,
    ) -> Result<StartupPoll, TorError> {
        {
            let mut inner = self.inner.lock().await;
            let status = self.state_tx.borrow().status;
            if status != TorStatus::Starting {
                return Err(TorError::InvalidTransition { status });
            }
            match inner.process.as_mut() {
                Some(process) => {
                    if let Ok(Some(code)) = process.try_wait() {
                        warn!(exit = %code, "tor exited during bootstrap");
                        return Ok(StartupPoll::Died);
                    }
                }
                None => return Ok(StartupPoll::Died),
            }
        }

        if bootstrapped.load(Ordering::SeqCst) && probe_control(control_port).await {
            Ok(StartupPoll::Healthy)
        } else {
            Ok(StartupPoll::Pending)
        }
    }

    /// Publish a status transition, keeping `last_renewal_at`.
    fn publish(&self, status: TorStatus, endpoint: Option<SocketAddr>) {
        let last_renewal_at = self.state_tx.borrow().last_renewal_at;
        self.state_tx.send_replace(TorStateSnapshot {
            status,
            socks_endpoint: endpoint,
            last_renewal_at,
        });
        self.events
            .publish(StatusEvent::TorStatusChanged { status, endpoint });
    }

    #[cfg(test)]
    pub(crate) async fn force_state_for_tests(
        &self,
        status: TorStatus,
        endpoint: Option<SocketAddr>,
        external: bool,
    ) {
        let mut inner = self.inner.lock().await;
        inner.external = external;
        inner.health_failures = 0;
        self.publish(status, endpoint);
    }
}

enum StartupPoll {
    Healthy,
    Died,
    Pending,
}

/// SIGTERM, bounded grace, then SIGKILL. No-op when nothing runs.
async fn terminate(process: &mut Option<Child>) {
    let Some(mut child) = process.take() else {
        return;
    };

    #[cfg(unix)]
    {
        unsafe {
            libc::kill(child.id() as i32, libc::SIGTERM);
        }
        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
                Err(_) => break,
            }
        }
        warn!("tor ignored SIGTERM, killing");
    }

    let _ = child.kill();
    let _ = child.wait();
}

pub(crate) fn port_in_use(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
}

/// Render the torrc for a supervised daemon.
fn generate_torrc(
    data_dir: &Path,
    socks_port: u16,
    control_port: u16,
    exit_countries: &[String],
) -> String {
    let mut torrc = format!(
        r#"# veilshell Tor configuration
# Auto-generated - do not edit manually

DataDirectory {data_dir}
SocksPort {socks_port}
ControlPort {control_port}

# Logging
Log notice stderr

# Safety settings
SafeLogging 1
"#,
        data_dir = data_dir.display(),
        socks_port = socks_port,
        control_port = control_port,
    );

    if !exit_countries.is_empty() {
        let nodes = exit_countries
            .iter()
            .map(|country| format!("{{{country}}}"))
            .collect::<Vec<_>>()
            .join(",");
        torrc.push_str(&format!("\nExitNodes {nodes}\nStrictNodes 1\n"));
    }

    torrc
}
