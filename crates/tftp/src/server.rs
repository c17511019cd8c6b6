//! TFTP Server Implementation
//!
//! The dispatcher: listens on the well-known port, hands every new request to
//! its own [`serve_request`] task on a fresh socket, and collects the
//! outcomes over a channel for logging.
//!
//! Sessions never share state. Two concurrent writes of the same filename
//! race at the filesystem layer: with overwriting disabled the second
//! exclusive create fails with "file already exists", otherwise the last
//! writer wins. Callers that need more must serialise by filename themselves.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::protocol::{MAX_PACKET_SIZE, Request, get_opcode};
use crate::session::{SessionConfig, TransferOutcome, serve_request};
use crate::transfer::create_ephemeral_socket;

const DEFAULT_BIND: &str = "0.0.0.0:4970";

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Local address for per-transfer sockets; follows the client's address family when unset
    pub local_bind: Option<IpAddr>,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            local_bind: None,
            session: SessionConfig::default(),
        }
    }
}

/// Completion report sent from a finished session back to the dispatcher
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub client: SocketAddr,
    /// "RRQ name" / "WRQ name", or the raw opcode when the request didn't parse
    pub request: String,
    pub outcome: TransferOutcome,
}

/// Main TFTP server
#[derive(Debug)]
pub struct TftpServer {
    config: ServerConfig,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a new TFTP server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config, socket: None }
    }

    /// Create a new TFTP server with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listening socket and return the bound address.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind TFTP server socket on {}", self.config.bind_address))?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;
        self.socket = Some(socket);
        Ok(local_addr)
    }

    /// Get the local address the server is bound to (if running)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Start the TFTP server (binding first if needed) and run the main loop
    pub async fn run(mut self) -> Result<()> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => {
                self.bind().await?;
                self.socket.take().context("listening socket missing after bind")?
            }
        };

        tracing::info!(
            "TFTP server listening on {}, reading from {}, writing to {}",
            socket.local_addr().context("Failed to get local address")?,
            self.config.session.read_root.display(),
            self.config.session.write_root.display()
        );

        self.serve(socket).await
    }

    /// Main server loop
    async fn serve(&self, socket: UdpSocket) -> Result<()> {
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<SessionReport>();
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let mut active: usize = 0;

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buffer) => {
                    let (len, client) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // ICMP errors for earlier sends can surface here; the listener keeps going.
                            tracing::debug!("Receive error on listening socket: {}", e);
                            continue;
                        }
                    };

                    if len < 2 {
                        tracing::debug!("Dropping {}-byte datagram from {}", len, client);
                        continue;
                    }

                    if self.dispatch(&buffer[..len], client, report_tx.clone()).await {
                        active += 1;
                    }
                }
                Some(report) = report_rx.recv() => {
                    active = active.saturating_sub(1);
                    log_report(&report, active);
                }
            }
        }
    }

    /// Spawn a session task for the datagram. Returns whether a task was started.
    async fn dispatch(
        &self,
        datagram: &[u8],
        client: SocketAddr,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> bool {
        let label = describe_request(datagram);
        tracing::info!("{} from {}", label, client);

        let socket = match create_ephemeral_socket(client, self.config.local_bind).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!("Cannot serve {} from {}: {:#}", label, client, e);
                return false;
            }
        };

        let datagram = datagram.to_vec();
        let config = self.config.session.clone();
        tokio::spawn(async move {
            let outcome = serve_request(client, &datagram, socket, config).await;
            let report = SessionReport {
                client,
                request: label,
                outcome,
            };
            if reports.send(report).is_err() {
                tracing::debug!("Dispatcher gone before session for {} finished", client);
            }
        });
        true
    }
}

fn describe_request(datagram: &[u8]) -> String {
    match Request::parse(datagram) {
        Ok(request) => format!("{} '{}' ({})", request.kind.opcode(), request.filename, request.mode),
        Err(_) => match get_opcode(datagram) {
            Some(opcode) => format!("opcode {}", opcode),
            None => "empty datagram".to_string(),
        },
    }
}

fn log_report(report: &SessionReport, active: usize) {
    match report.outcome {
        TransferOutcome::Complete => {
            tracing::info!("{} for {} complete ({} active)", report.request, report.client, active)
        }
        TransferOutcome::Failed(kind) => {
            tracing::warn!(
                "{} for {} failed: {:?} ({} active)",
                report.request,
                report.client,
                kind,
                active
            )
        }
    }
}

/// Run a TFTP server with the given configuration
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(config: ServerConfig) -> Result<()> {
    TftpServer::new(config).run().await
}
