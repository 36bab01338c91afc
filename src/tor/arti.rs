//! Embedded Arti client (experimental, `embedded-tor` feature).
//!
//! Provides an in-process Tor client as an alternative to supervising
//! the C-Tor daemon. Streams are opened directly through the client
//! rather than through a local SOCKS listener, so the proxy router is
//! bypassed in this mode.

use arti_client::{TorClient, TorClientConfig};
use tokio::sync::OnceCell;
use tor_rtcompat::PreferredRuntime;
use tracing::info;

use super::TorError;

static ARTI: OnceCell<ArtiBackend> = OnceCell::const_new();

/// A bootstrapped in-process Tor client.
pub struct ArtiBackend {
    client: TorClient<PreferredRuntime>,
}

impl ArtiBackend {
    /// Bootstrap a new client onto the Tor network.
    pub async fn bootstrap() -> Result<Self, TorError> {
        info!("bootstrapping embedded tor client");
        let config = TorClientConfig::default();
        let client = TorClient::create_bootstrapped(config)
            .await
            .map_err(|e| TorError::Control(format!("arti bootstrap failed: {e}")))?;
        info!("embedded tor client ready");
        Ok(Self { client })
    }

    /// Open an anonymized stream to `host:port`.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<arti_client::DataStream, TorError> {
        self.client
            .connect((host, port))
            .await
            .map_err(|e| TorError::Control(format!("arti connect failed: {e}")))
    }

    /// Request fresh circuits for subsequent streams.
    pub fn isolate_new_circuits(&self) -> Self {
        Self {
            client: self.client.isolated_client(),
        }
    }
}

/// Get the process-wide client, bootstrapping it on first use.
pub async fn get_or_init_arti() -> Result<&'static ArtiBackend, TorError> {
    ARTI.get_or_try_init(ArtiBackend::bootstrap).await
}

/// Whether the process-wide client has finished bootstrapping.
pub fn is_arti_ready() -> bool {
    ARTI.initialized()
}
