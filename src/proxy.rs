//! Proxy router: the single switch between direct and anonymized egress.
//!
//! A binding is an immutable value (endpoint plus a client configured
//! for it) swapped atomically behind a lock. A request in flight holds
//! its own handle to whichever binding it started with, so it observes
//! the old or the new configuration, never a mix.
//!
//! When the supervisor reports `Failed`, the router unbinds and refuses
//! new anonymized requests until the circuit is `Connected` again.
//! Fail-closed: a dead proxy must not silently fall back to direct.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::tor::{TorStateSnapshot, TorStatus};

/// Environment variables exported for spawned subprocesses.
const PROXY_ENV_VARS: [&str; 3] = ["ALL_PROXY", "HTTP_PROXY", "HTTPS_PROXY"];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("anonymized routing unavailable: tor is not connected")]
    NotRoutable,
    #[error("failed to construct proxied client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyBinding {
    endpoint: SocketAddr,
    client: reqwest::Client,
}

impl ProxyBinding {
    fn new(endpoint: SocketAddr) -> Result<Self, ProxyError> {
        // socks5h resolves hostnames through the proxy; local DNS
        // resolution would leak every visited domain
        let proxy = reqwest::Proxy::all(format!("socks5h://{endpoint}"))?;
        let client = reqwest::Client::builder().proxy(proxy).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[derive(Default)]
struct RouterState {
    binding: Option<Arc<ProxyBinding>>,
}

/// Atomic switch for outbound routing.
pub struct ProxyRouter {
    state: RwLock<RouterState>,
    direct: reqwest::Client,
}

impl ProxyRouter {
    pub fn new() -> Result<Self, ProxyError> {
        // The direct client must ignore proxy environment variables;
        // bind() exports them for subprocesses and a default client
        // would pick them up and defeat the explicit direct path
        let direct = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            state: RwLock::new(RouterState::default()),
            direct,
        })
    }

    /// Route all anonymized traffic through `endpoint`.
    ///
    /// Also exports `ALL_PROXY`/`HTTP_PROXY`/`HTTPS_PROXY` so spawned
    /// subprocesses inherit the route.
    pub fn bind(&self, endpoint: SocketAddr) -> Result<(), ProxyError> {
        let binding = Arc::new(ProxyBinding::new(endpoint)?);
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.binding = Some(binding);
        }
        let url = format!("socks5://{endpoint}");
        for var in PROXY_ENV_VARS {
            std::env::set_var(var, &url);
        }
        info!(%endpoint, "proxy bound");
        Ok(())
    }

    /// Remove proxying entirely.
    pub fn unbind(&self) {
        let had_binding = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.binding.take().is_some()
        };
        for var in PROXY_ENV_VARS {
            std::env::remove_var(var);
        }
        if had_binding {
            info!("proxy unbound");
        }
    }

    /// Whether anonymized requests can currently be routed.
    pub fn is_routable(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .binding
            .is_some()
    }

    /// The currently bound endpoint, if any.
    pub fn bound_endpoint(&self) -> Option<SocketAddr> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .binding
            .as_ref()
            .map(|b| b.endpoint)
    }

    /// The binding for a new request.
    ///
    /// Anonymized requests are refused while unbound; requests from
    /// tabs that opted out of anonymization get the direct client.
    pub fn binding_for(&self, anonymized: bool) -> Result<RouteBinding, ProxyError> {
        if !anonymized {
            return Ok(RouteBinding::Direct(self.direct.clone()));
        }
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        match &state.binding {
            Some(binding) => Ok(RouteBinding::Proxied(Arc::clone(binding))),
            None => Err(ProxyError::NotRoutable),
        }
    }

    /// Apply one supervisor snapshot.
    pub fn apply_snapshot(&self, snapshot: &TorStateSnapshot) {
        match (snapshot.status, snapshot.socks_endpoint) {
            (TorStatus::Connected, Some(endpoint)) => {
                if self.bound_endpoint() != Some(endpoint) {
                    if let Err(e) = self.bind(endpoint) {
                        warn!(error = %e, "failed to bind published endpoint");
                        self.unbind();
                    }
                }
            }
            // Renewal keeps the existing route
            (TorStatus::Renewing, _) => {}
            (TorStatus::Failed, _) => {
                warn!("tor failed, refusing anonymized traffic until reconnected");
                self.unbind();
            }
            _ => {
                debug!(status = %snapshot.status, "proxy unbinding");
                self.unbind();
            }
        }
    }

    /// Follow a supervisor's state publications until it goes away.
    pub fn spawn_route_sync(
        self: &Arc<Self>,
        mut rx: watch::Receiver<TorStateSnapshot>,
    ) -> tokio::task::JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                router.apply_snapshot(&snapshot);
            }
        })
    }
}

/// The client a single request rides on.
#[derive(Debug, Clone)]
pub enum RouteBinding {
    Proxied(Arc<ProxyBinding>),
    Direct(reqwest::Client),
}

impl RouteBinding {
    pub fn client(&self) -> &reqwest::Client {
        match self {
            Self::Proxied(binding) => binding.client(),
            Self::Direct(client) => client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env mutations must not interleave across tests
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn snapshot(status: TorStatus, endpoint: Option<SocketAddr>) -> TorStateSnapshot {
        TorStateSnapshot {
            status,
            socks_endpoint: endpoint,
            last_renewal_at: None,
        }
    }

    #[test]
    fn test_bind_exports_env_and_routes() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = ProxyRouter::new().unwrap();

        router.bind(endpoint(9050)).unwrap();
        assert!(router.is_routable());
        assert_eq!(router.bound_endpoint(), Some(endpoint(9050)));
        for var in PROXY_ENV_VARS {
            assert_eq!(
                std::env::var(var).as_deref(),
                Ok("socks5://127.0.0.1:9050")
            );
        }

        router.unbind();
        assert!(!router.is_routable());
        for var in PROXY_ENV_VARS {
            assert!(std::env::var(var).is_err());
        }
    }

    #[test]
    fn test_unbound_refuses_anonymized_but_serves_direct() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = ProxyRouter::new().unwrap();

        let err = router.binding_for(true).unwrap_err();
        assert!(matches!(err, ProxyError::NotRoutable));
        assert!(router.binding_for(false).is_ok());
    }

    #[test]
    fn test_inflight_binding_survives_swap() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = ProxyRouter::new().unwrap();

        router.bind(endpoint(9050)).unwrap();
        let held = router.binding_for(true).unwrap();

        router.bind(endpoint(9150)).unwrap();
        let fresh = router.binding_for(true).unwrap();

        // The in-flight request still sees its original endpoint
        match (&held, &fresh) {
            (RouteBinding::Proxied(old), RouteBinding::Proxied(new)) => {
                assert_eq!(old.endpoint(), endpoint(9050));
                assert_eq!(new.endpoint(), endpoint(9150));
            }
            _ => panic!("expected proxied bindings"),
        }

        router.unbind();
    }

    #[test]
    fn test_snapshot_transitions_drive_binding() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = ProxyRouter::new().unwrap();

        router.apply_snapshot(&snapshot(TorStatus::Connected, Some(endpoint(9050))));
        assert!(router.is_routable());

        // Renewal does not drop the route
        router.apply_snapshot(&snapshot(TorStatus::Renewing, Some(endpoint(9050))));
        assert!(router.is_routable());

        // Failure closes the gate
        router.apply_snapshot(&snapshot(TorStatus::Failed, None));
        assert!(!router.is_routable());
        assert!(matches!(
            router.binding_for(true).unwrap_err(),
            ProxyError::NotRoutable
        ));

        // Reconnection reopens it
        router.apply_snapshot(&snapshot(TorStatus::Connected, Some(endpoint(9051))));
        assert!(router.is_routable());
        assert_eq!(router.bound_endpoint(), Some(endpoint(9051)));

        router.apply_snapshot(&snapshot(TorStatus::Stopped, None));
        assert!(!router.is_routable());
    }

    #[tokio::test]
    async fn test_route_sync_follows_watch() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let router = Arc::new(ProxyRouter::new().unwrap());
        let (tx, rx) = watch::channel(TorStateSnapshot::default());
        let task = router.spawn_route_sync(rx);

        tx.send_replace(snapshot(TorStatus::Connected, Some(endpoint(9052))));
        // Give the sync task a moment to observe the publication
        for _ in 0..50 {
            if router.is_routable() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(router.is_routable());

        tx.send_replace(snapshot(TorStatus::Failed, None));
        for _ in 0..50 {
            if !router.is_routable() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!router.is_routable());

        drop(tx);
        let _ = task.await;
        router.unbind();
    }
}
