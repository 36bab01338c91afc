//! Tor process supervision and circuit management.
//!
//! The supervisor owns the external `tor` daemon: it generates a torrc,
//! spawns the process, watches bootstrap progress, renews circuits over
//! the control port, and tears the daemon down again. Circuit state is
//! published atomically (status and endpoint together) on a watch channel
//! so readers never observe a stale endpoint for a fresh status.

mod control;
mod supervisor;

#[cfg(feature = "embedded-tor")]
mod arti;

pub use control::ControlClient;
pub use supervisor::{TorSupervisor, DEFAULT_HEALTH_INTERVAL, DEFAULT_START_TIMEOUT};

pub(crate) use control::probe_control;
pub(crate) use supervisor::port_in_use;

#[cfg(feature = "embedded-tor")]
pub use arti::{get_or_init_arti, is_arti_ready, ArtiBackend};

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TorStatus {
    Stopped,
    Starting,
    Connected,
    Renewing,
    Failed,
}

impl TorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Renewing => "renewing",
            Self::Failed => "failed",
        }
    }

    /// Whether traffic may be routed through the SOCKS endpoint.
    ///
    /// Renewing counts: the daemon's listener stays bound across a
    /// NEWNYM, so dropping routes during renewal would add a gratuitous
    /// outage window.
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Connected | Self::Renewing)
    }
}

impl std::fmt::Display for TorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic publication of circuit state.
///
/// `socks_endpoint` is present exactly when `status.is_routable()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TorStateSnapshot {
    pub status: TorStatus,
    pub socks_endpoint: Option<SocketAddr>,
    pub last_renewal_at: Option<DateTime<Utc>>,
}

impl Default for TorStateSnapshot {
    fn default() -> Self {
        Self {
            status: TorStatus::Stopped,
            socks_endpoint: None,
            last_renewal_at: None,
        }
    }
}

/// Errors raised by the supervisor and control channel.
#[derive(Debug, Error)]
pub enum TorError {
    #[error("tor binary not found in PATH or configured location")]
    BinaryNotFound,
    #[error("port {0} is already in use by another process")]
    PortInUse(u16),
    #[error("tor did not become healthy within {0:?}")]
    StartTimeout(Duration),
    #[error("circuit renewal throttled, retry in {retry_after:?}")]
    RenewalThrottled { retry_after: Duration },
    #[error("tor is not connected")]
    NotConnected,
    #[error("operation not valid while {status}")]
    InvalidTransition { status: TorStatus },
    #[error("control channel error: {0}")]
    Control(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Timeout applied to each probe and control-channel exchange.
pub(crate) const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Check that a SOCKS5 listener answers at `endpoint`.
///
/// Sends a no-auth greeting and expects the `05 00` method reply. This
/// proves an actual SOCKS5 speaker, not just an open port.
pub(crate) async fn probe_socks(endpoint: SocketAddr) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(endpoint).await.ok()?;
        stream.write_all(&[0x05, 0x01, 0x00]).await.ok()?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await.ok()?;
        Some(reply == [0x05, 0x00])
    };
    matches!(
        tokio::time::timeout(IO_TIMEOUT, attempt).await,
        Ok(Some(true))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_status_display_and_routability() {
        assert_eq!(TorStatus::Stopped.to_string(), "stopped");
        assert_eq!(TorStatus::Connected.to_string(), "connected");
        assert!(TorStatus::Connected.is_routable());
        assert!(TorStatus::Renewing.is_routable());
        assert!(!TorStatus::Starting.is_routable());
        assert!(!TorStatus::Failed.is_routable());
        assert!(!TorStatus::Stopped.is_routable());
    }

    #[test]
    fn test_default_snapshot_is_stopped() {
        let snapshot = TorStateSnapshot::default();
        assert_eq!(snapshot.status, TorStatus::Stopped);
        assert!(snapshot.socks_endpoint.is_none());
        assert!(snapshot.last_renewal_at.is_none());
    }

    #[tokio::test]
    async fn test_probe_rejects_non_socks_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n").await;
            }
        });
        assert!(!probe_socks(endpoint).await);
    }

    #[tokio::test]
    async fn test_probe_accepts_socks_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut greeting = [0u8; 3];
                if stream.read_exact(&mut greeting).await.is_ok() {
                    let _ = stream.write_all(&[0x05, 0x00]).await;
                }
            }
        });
        assert!(probe_socks(endpoint).await);
    }

    #[tokio::test]
    async fn test_probe_fails_on_closed_port() {
        // Bind and immediately drop to get a port that is very likely closed
        let endpoint = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        assert!(!probe_socks(endpoint).await);
    }
}
