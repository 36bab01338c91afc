//! Tor control-port client.
//!
//! Speaks the minimal subset of the control protocol the supervisor
//! needs: `AUTHENTICATE` and `SIGNAL NEWNYM`. The generated torrc does
//! not enable cookie or password auth, so authentication is the empty
//! form. Every exchange is bounded by [`IO_TIMEOUT`](super::IO_TIMEOUT).

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::{TorError, IO_TIMEOUT};

/// A connected control-port session.
pub struct ControlClient {
    stream: BufReader<TcpStream>,
}

impl ControlClient {
    /// Connect to the control port on localhost.
    pub async fn connect(port: u16) -> Result<Self, TorError> {
        let endpoint = SocketAddr::from(([127, 0, 0, 1], port));
        let stream = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TorError::Control(format!("connect to control port {port} timed out")))?
            .map_err(TorError::Io)?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Authenticate the session. Must be the first command.
    pub async fn authenticate(&mut self) -> Result<(), TorError> {
        let reply = self.command("AUTHENTICATE \"\"").await?;
        if reply.starts_with("250") {
            Ok(())
        } else {
            Err(TorError::Control(format!("authentication refused: {reply}")))
        }
    }

    /// Request fresh circuits for subsequent streams.
    pub async fn signal_newnym(&mut self) -> Result<(), TorError> {
        let reply = self.command("SIGNAL NEWNYM").await?;
        if reply.starts_with("250") {
            debug!("control port accepted NEWNYM");
            Ok(())
        } else {
            Err(TorError::Control(format!("NEWNYM refused: {reply}")))
        }
    }

    /// Close the session politely. Errors are ignored; the daemon drops
    /// the connection either way.
    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }

    /// Send one command line and read the status reply line.
    async fn command(&mut self, line: &str) -> Result<String, TorError> {
        let exchange = async {
            self.stream
                .get_mut()
                .write_all(format!("{line}\r\n").as_bytes())
                .await?;
            let mut reply = String::new();
            self.stream.read_line(&mut reply).await?;
            Ok::<String, std::io::Error>(reply.trim_end().to_string())
        };
        tokio::time::timeout(IO_TIMEOUT, exchange)
            .await
            .map_err(|_| TorError::Control(format!("control command timed out: {line}")))?
            .map_err(TorError::Io)
    }
}

/// Probe the control port: connect and authenticate, nothing more.
pub(crate) async fn probe_control(port: u16) -> bool {
    match ControlClient::connect(port).await {
        Ok(mut client) => {
            let healthy = client.authenticate().await.is_ok();
            client.quit().await;
            healthy
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Minimal fake control port answering each line with a fixed reply.
    async fn fake_control(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                for reply in replies {
                    if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if stream
                        .write_all(format!("{reply}\r\n").as_bytes())
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_authenticate_and_newnym() {
        let port = fake_control(vec!["250 OK", "250 OK", "250 closing connection"]).await;
        let mut client = ControlClient::connect(port).await.unwrap();
        client.authenticate().await.unwrap();
        client.signal_newnym().await.unwrap();
        client.quit().await;
    }

    #[tokio::test]
    async fn test_refused_authentication_is_control_error() {
        let port = fake_control(vec!["515 Bad authentication"]).await;
        let mut client = ControlClient::connect(port).await.unwrap();
        let err = client.authenticate().await.unwrap_err();
        assert!(matches!(err, TorError::Control(_)));
    }

    #[tokio::test]
    async fn test_refused_newnym_is_control_error() {
        let port = fake_control(vec!["250 OK", "550 rate limited"]).await;
        let mut client = ControlClient::connect(port).await.unwrap();
        client.authenticate().await.unwrap();
        let err = client.signal_newnym().await.unwrap_err();
        assert!(matches!(err, TorError::Control(_)));
    }

    #[tokio::test]
    async fn test_probe_control_happy_and_sad() {
        let good = fake_control(vec!["250 OK", "250 closing connection"]).await;
        assert!(probe_control(good).await);

        let bad = fake_control(vec!["515 Bad authentication"]).await;
        assert!(!probe_control(bad).await);
    }
}
