//! TFTP Transfer Session
//!
//! One [`TransferSession`] serves one client request over one dedicated
//! socket, then ends. The session walks a small state machine:
//!
//! ```text
//! Start ──► Reading ──► Complete
//!   │          │
//!   │          └──────► Failed
//!   ├──► Writing ──► Complete
//!   │          │
//!   │          └──────► Failed
//!   └─────────────────► Failed
//! ```
//!
//! Exactly one DATA block is in flight at any time. Sessions share nothing;
//! each owns its socket and at most one open file, both released when
//! [`TransferSession::run`] returns.

use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::BufReader;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::block::{Block, BlockReader, BlockWriter, WriteProgress};
use crate::error::{FailureKind, Result, TransferError};
use crate::protocol::{MAX_PACKET_SIZE, Packet, Request, RequestKind, TftpErrorCode, build_ack, build_data};
use crate::retry::{AckTracker, AckVerdict, DataTracker, DataVerdict, IdleVerdict, RetryPolicy, TimeoutVerdict};
use crate::transfer::send_error;

const DEFAULT_READ_ROOT: &str = "./read";
const DEFAULT_WRITE_ROOT: &str = "./write";

/// Per-session configuration, handed in by the dispatcher
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory served to read requests
    pub read_root: PathBuf,
    /// Directory receiving write requests
    pub write_root: PathBuf,
    pub retry: RetryPolicy,
    /// Replace existing files on WRQ instead of refusing with "file already exists"
    pub allow_overwrite: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_root: PathBuf::from(DEFAULT_READ_ROOT),
            write_root: PathBuf::from(DEFAULT_WRITE_ROOT),
            retry: RetryPolicy::default(),
            allow_overwrite: false,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete,
    Failed(FailureKind),
}

/// States of the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Reading,
    Writing,
    Complete,
    Failed(FailureKind),
}

/// Parse the first datagram of a request and serve it on `socket`.
///
/// A datagram that is not a well-formed RRQ/WRQ is answered with a single
/// ERROR packet and the session ends without leaving `Start`.
pub async fn serve_request(
    client: SocketAddr,
    datagram: &[u8],
    socket: UdpSocket,
    config: SessionConfig,
) -> TransferOutcome {
    match Request::parse(datagram) {
        Ok(request) => TransferSession::new(client, request, socket, config).run().await,
        Err(err) => {
            tracing::warn!("Rejecting request from {}: {}", client, err);
            if let Some(code) = err.wire_code() {
                send_error(&socket, client, code, &err.wire_message()).await;
            }
            TransferOutcome::Failed(err.kind())
        }
    }
}

/// State machine driving one transfer for one client
#[derive(Debug)]
pub struct TransferSession {
    client: SocketAddr,
    request: Request,
    socket: UdpSocket,
    config: SessionConfig,
    state: SessionState,
}

impl TransferSession {
    pub fn new(client: SocketAddr, request: Request, socket: UdpSocket, config: SessionConfig) -> Self {
        Self {
            client,
            request,
            socket,
            config,
            state: SessionState::Start,
        }
    }

    /// Run the transfer to completion or failure.
    ///
    /// On failure a best-effort ERROR packet is sent (unless the client itself
    /// aborted) and any partially written destination file is removed.
    pub async fn run(mut self) -> TransferOutcome {
        let result = match self.request.kind {
            RequestKind::Read => self.read().await,
            RequestKind::Write => self.write().await,
        };

        match result {
            Ok(()) => {
                self.transition(SessionState::Complete);
                TransferOutcome::Complete
            }
            Err(err) => {
                tracing::warn!(
                    "{} of '{}' for {} failed: {}",
                    self.request.kind.opcode(),
                    self.request.filename,
                    self.client,
                    err
                );
                if let Some(code) = err.wire_code() {
                    send_error(&self.socket, self.client, code, &err.wire_message()).await;
                }
                let kind = err.kind();
                self.transition(SessionState::Failed(kind));
                TransferOutcome::Failed(kind)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session {} ({}): {:?} -> {:?}", self.client, self.request.filename, self.state, next);
        self.state = next;
    }

    fn check_mode(&self) -> Result<()> {
        match self.request.transfer_mode() {
            Some(mode) if mode.is_supported() => Ok(()),
            _ => Err(TransferError::UnsupportedOperation(format!(
                "transfer mode '{}' not supported",
                self.request.mode
            ))),
        }
    }

    async fn read(&mut self) -> Result<()> {
        self.check_mode()?;
        let path = resolve_read_path(&self.config.read_root, &self.request.filename).await?;
        let file = open_source(&path, &self.request.filename).await?;

        self.transition(SessionState::Reading);
        tracing::info!("Sending '{}' to {}", self.request.filename, self.client);

        let mut blocks = BlockReader::new(BufReader::new(file));
        let mut tracker = AckTracker::new(&self.config.retry);
        let mut sent: u32 = 0;

        while let Some(block) = blocks.next_block().await? {
            let packet = build_data(block.number, &block.payload);
            tracker.sent(block.number);
            self.send_until_acked(&packet, &mut tracker).await?;
            sent += 1;
        }

        tracing::info!(
            "Sent '{}' to {} in {} blocks",
            self.request.filename,
            self.client,
            sent
        );
        Ok(())
    }

    /// Send one DATA packet and wait for its ACK, retransmitting on timeout.
    async fn send_until_acked(&self, packet: &[u8], tracker: &mut AckTracker) -> Result<()> {
        loop {
            self.socket.send_to(packet, self.client).await?;
            let deadline = Instant::now() + self.config.retry.timeout;

            while let Some(reply) = self.recv_until(deadline).await? {
                match reply {
                    Packet::Ack { block } => match tracker.on_ack(block) {
                        AckVerdict::Advance => return Ok(()),
                        AckVerdict::Stale => {
                            tracing::debug!("Ignoring stale ACK {} (pending {})", block, tracker.pending());
                        }
                        AckVerdict::Unexpected => {
                            tracing::debug!("Ignoring unexpected ACK {} (pending {})", block, tracker.pending());
                        }
                    },
                    Packet::Error { code, message } => return Err(TransferError::Aborted { code, message }),
                    other => tracing::debug!("Ignoring {} while waiting for ACK", other.opcode()),
                }
            }

            match tracker.on_timeout() {
                TimeoutVerdict::Retransmit => {
                    tracing::debug!(
                        "Retransmitting block {} to {} (attempt {})",
                        tracker.pending(),
                        self.client,
                        tracker.retransmissions()
                    );
                }
                TimeoutVerdict::GiveUp => {
                    return Err(TransferError::Timeout {
                        block: tracker.pending(),
                        attempts: tracker.retransmissions() + 1,
                    });
                }
            }
        }
    }

    async fn write(&mut self) -> Result<()> {
        self.check_mode()?;
        let filename = self.request.filename.clone();
        let path = resolve_write_path(&self.config.write_root, &filename, self.config.allow_overwrite).await?;
        let file = create_destination(&path, &filename, self.config.allow_overwrite).await?;
        let mut upload = PartialUpload::new(path);

        self.transition(SessionState::Writing);
        tracing::info!("Receiving '{}' from {}", filename, self.client);

        let mut writer = BlockWriter::new(file);
        let mut tracker = DataTracker::new(&self.config.retry);
        let window = self.config.retry.timeout;

        self.send_ack(0).await?;
        let mut deadline = Instant::now() + window;

        loop {
            let Some(packet) = self.recv_until(deadline).await? else {
                match tracker.on_timeout() {
                    IdleVerdict::KeepWaiting => {
                        tracing::debug!(
                            "No DATA from {} for {} window(s), still waiting for block {}",
                            self.client,
                            tracker.idle_windows(),
                            tracker.expected()
                        );
                        deadline = Instant::now() + window;
                        continue;
                    }
                    IdleVerdict::GiveUp => {
                        return Err(TransferError::Timeout {
                            block: tracker.expected(),
                            attempts: tracker.idle_windows(),
                        });
                    }
                }
            };

            match packet {
                Packet::Data { block, payload } => match tracker.on_data(block) {
                    DataVerdict::Accept => {
                        let block = Block::new(block, payload);
                        let progress = writer
                            .write_block(&block)
                            .await
                            .map_err(|e| TransferError::from_write(e, &filename))?;

                        if progress == WriteProgress::Finished {
                            writer.finish().await.map_err(|e| TransferError::from_write(e, &filename))?;
                            self.send_ack(block.number).await?;
                            upload.keep();
                            tracing::info!(
                                "Received '{}' from {} ({} bytes)",
                                filename,
                                self.client,
                                writer.bytes_written()
                            );
                            self.dally(block.number).await;
                            return Ok(());
                        }

                        self.send_ack(block.number).await?;
                        tracker.accepted();
                        deadline = Instant::now() + window;
                    }
                    DataVerdict::Duplicate(ack) => {
                        tracing::debug!("Duplicate DATA {} from {}, re-acknowledging", block, self.client);
                        self.send_ack(ack).await?;
                        deadline = Instant::now() + window;
                    }
                    DataVerdict::Unexpected(ack) => {
                        tracing::debug!(
                            "Unexpected DATA {} from {} (expected {}), re-sending ACK {}",
                            block,
                            self.client,
                            tracker.expected(),
                            ack
                        );
                        self.send_ack(ack).await?;
                    }
                },
                Packet::Error { code, message } => return Err(TransferError::Aborted { code, message }),
                other => tracing::debug!("Ignoring {} while waiting for DATA", other.opcode()),
            }
        }
    }

    /// Linger one timeout window after the final ACK, re-acknowledging the
    /// final block if the client retransmits it because that ACK was lost.
    async fn dally(&self, last: u16) {
        let deadline = Instant::now() + self.config.retry.timeout;

        loop {
            match self.recv_until(deadline).await {
                Ok(None) => return,
                Ok(Some(Packet::Data { block, .. })) if block == last => {
                    tracing::debug!("Final DATA {} repeated by {}, re-acknowledging", block, self.client);
                    if let Err(e) = self.send_ack(last).await {
                        tracing::debug!("Failed to re-send final ACK to {}: {}", self.client, e);
                        return;
                    }
                }
                Ok(Some(other)) => tracing::debug!("Ignoring {} after final ACK", other.opcode()),
                Err(e) => {
                    tracing::debug!("Receive error while dallying for {}: {}", self.client, e);
                    return;
                }
            }
        }
    }

    async fn send_ack(&self, block: u16) -> Result<()> {
        self.socket.send_to(&build_ack(block), self.client).await?;
        Ok(())
    }

    /// Wait until `deadline` for a decodable packet from the client.
    ///
    /// Returns `None` on timeout. Datagrams from other sources get an
    /// "unknown transfer ID" error and undecodable ones are dropped; neither
    /// moves the deadline.
    async fn recv_until(&self, deadline: Instant) -> Result<Option<Packet>> {
        // One spare byte so an oversized DATA packet is seen as such instead of truncated to fit.
        let mut buf = [0u8; MAX_PACKET_SIZE + 1];

        loop {
            let (n, src) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(received) => received?,
            };

            if src != self.client {
                tracing::debug!("Packet from unknown transfer ID {} (session {})", src, self.client);
                send_error(
                    &self.socket,
                    src,
                    TftpErrorCode::UnknownTransferId,
                    TftpErrorCode::UnknownTransferId.default_message(),
                )
                .await;
                continue;
            }

            match Packet::decode(&buf[..n]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => tracing::debug!("Dropping undecodable packet from {}: {}", src, e),
            }
        }
    }
}

/// Removes a partially written destination file unless the transfer completed.
#[derive(Debug)]
struct PartialUpload {
    path: Option<PathBuf>,
}

impl PartialUpload {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialUpload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed partial upload {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e),
            }
        }
    }
}

/// Turn a client-supplied filename into a path relative to a served root.
///
/// Leading slashes are dropped; any `..`, `.` or prefix component is an
/// access violation.
fn relative_path(filename: &str) -> Result<PathBuf> {
    let trimmed = filename.trim_start_matches('/');
    let mut relative = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            _ => {
                return Err(TransferError::AccessViolation(format!(
                    "'{}' escapes the served directory",
                    filename
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(TransferError::AccessViolation(format!("'{}' names no file", filename)));
    }
    Ok(relative)
}

/// Validate file path and check for path traversal attacks
async fn resolve_read_path(root: &Path, filename: &str) -> Result<PathBuf> {
    let relative = relative_path(filename)?;

    let root_canon = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| TransferError::FileNotFound(filename.to_string()))?;
    let path_canon = tokio::fs::canonicalize(root.join(&relative))
        .await
        .map_err(|_| TransferError::FileNotFound(filename.to_string()))?;

    // A symlink inside the root may still point outside of it.
    if !path_canon.starts_with(&root_canon) {
        return Err(TransferError::AccessViolation(format!(
            "'{}' resolves outside the served directory",
            filename
        )));
    }

    Ok(path_canon)
}

async fn open_source(path: &Path, filename: &str) -> Result<File> {
    let file = File::open(path)
        .await
        .map_err(|_| TransferError::FileNotFound(filename.to_string()))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| TransferError::FileNotFound(filename.to_string()))?;
    if !metadata.is_file() {
        return Err(TransferError::FileNotFound(filename.to_string()));
    }
    Ok(file)
}

async fn resolve_write_path(root: &Path, filename: &str, allow_overwrite: bool) -> Result<PathBuf> {
    let relative = relative_path(filename)?;
    let access_violation = |reason: &str| TransferError::AccessViolation(format!("'{}': {}", filename, reason));

    let root_canon = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| access_violation("write directory unavailable"))?;

    let requested = root.join(&relative);
    let name = requested
        .file_name()
        .ok_or_else(|| access_violation("no file name"))?
        .to_owned();
    let parent = requested.parent().ok_or_else(|| access_violation("no parent directory"))?;
    let parent_canon = tokio::fs::canonicalize(parent)
        .await
        .map_err(|_| access_violation("parent directory does not exist"))?;

    if !parent_canon.starts_with(&root_canon) {
        return Err(access_violation("resolves outside the served directory"));
    }

    let target = parent_canon.join(name);
    if allow_overwrite
        && let Ok(metadata) = tokio::fs::symlink_metadata(&target).await
        && !metadata.is_file()
    {
        return Err(access_violation("not a regular file"));
    }

    Ok(target)
}

async fn create_destination(path: &Path, filename: &str, allow_overwrite: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if allow_overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    options.open(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => TransferError::FileAlreadyExists(filename.to_string()),
        io::ErrorKind::StorageFull => TransferError::DiskFull(filename.to_string()),
        _ => TransferError::AccessViolation(format!("cannot create '{}': {}", filename, e)),
    })
}
