//! The sync engine: outbound fan-out, inbound filtering, file transfers.
//!
//! Outbound:
//! ```text
//! local change -> hash -> loop / dedup check -> seal -> send to each authorized peer
//! ```
//! Inbound:
//! ```text
//! frame -> open -> decode -> authorize origin -> dedup -> apply / transfer
//! ```
//!
//! The dedup set, the last received hash and the open file transfers live
//! behind one async mutex, so inbound connections are applied one at a
//! time. Network sends happen outside the lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sync_content::{
    compress, decompress, persist_unique, read_head, should_compress, ChunkReader,
    CompressionError, ContentError, FileSink,
};
use sync_core::{
    chunk_size_for, is_plausibly_text, ChunkDisposition, PeerDirectory, PeerIdentity,
    PendingFileTransfer, RecentHashSet, Throttle, TransferError, TransferTable, SNIFF_LEN,
};
use sync_types::{
    hash_payload, ClipboardEntry, ContentHash, FileChunk, FileHeader, FileId, Handshake,
    Payload, Ping, SnippetCollection, SyncEnvelope, SyncError, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::crypto::{CryptoError, SyncKey};
use crate::stores::Collaborators;
use crate::transport::{FrameHandler, Transport, MAX_FRAME_SIZE};

/// Local failures while preparing or sending.
///
/// Per-peer delivery failures are not errors; they show up in
/// [`BroadcastReport::failed`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Envelope encoding failed.
    #[error(transparent)]
    Encoding(#[from] SyncError),

    /// Sealing failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Reading a file to send failed.
    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Inbound messages that break the protocol. Logged and dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// File name that cannot be stored safely.
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),

    /// Compressed chunk without its original size.
    #[error("compressed chunk is missing its original size")]
    MissingOriginalSize,

    /// Declared chunk size over the frame limit.
    #[error("chunk too large: {size} bytes (limit: {limit} bytes)")]
    ChunkTooLarge {
        /// Declared size.
        size: u64,
        /// Limit in effect.
        limit: usize,
    },

    /// Chunk failed to decompress to its declared size.
    #[error("chunk decompression failed: {0}")]
    Decompression(#[from] CompressionError),

    /// Transfer bookkeeping rejected the header or chunk.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local device name, used as envelope origin
    pub device_name: String,
    /// Port advertised in handshakes
    pub port: u16,
    /// Whether sync starts enabled
    pub enabled: bool,
    /// Where received files are written
    pub download_dir: PathBuf,
    /// Idle time after which an incoming transfer is abandoned
    pub stale_after: Duration,
    /// Inter-chunk delay
    pub throttle: Throttle,
}

impl EngineConfig {
    /// Settings with defaults for everything but name and download directory.
    pub fn new(device_name: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_name: device_name.into(),
            port: 5566,
            enabled: true,
            download_dir: download_dir.into(),
            stale_after: Duration::from_secs(300),
            throttle: Throttle::default(),
        }
    }
}

/// Why an outbound operation sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    /// Sync is disabled
    Disabled,
    /// The content is what was just received from the network
    LoopBack,
    /// The content was already seen within the dedup window
    Duplicate,
}

/// Per-peer outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers that acknowledged
    pub delivered: Vec<String>,
    /// Peers that could not be reached
    pub failed: Vec<String>,
    /// Set when nothing was sent at all
    pub suppressed: Option<Suppressed>,
}

impl BroadcastReport {
    fn suppressed(reason: Suppressed) -> Self {
        Self {
            suppressed: Some(reason),
            ..Self::default()
        }
    }
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Could not be opened with our key
    Undecryptable,
    /// Opened, but not a valid envelope
    Malformed,
    /// Sync is disabled
    Disabled,
    /// Origin is not on the allow-list
    Unauthorized,
    /// Content already seen within the dedup window
    Duplicate,
    /// Clipboard item or snippet collection handed to its store
    Applied,
    /// Ping or handshake refreshed the peer's liveness
    LivenessRefreshed,
    /// File header accepted, partial file created
    TransferOpened,
    /// File chunk written
    ChunkWritten,
    /// Last chunk written, file handed to history
    TransferCompleted,
    /// Header or chunk violated the transfer protocol
    Rejected,
    /// Writing failed; the transfer was abandoned
    TransferFailed,
}

struct EngineState {
    recent: RecentHashSet,
    last_received: Option<ContentHash>,
    transfers: TransferTable<FileSink>,
}

/// Top-level coordinator.
pub struct SyncEngine<T: Transport> {
    device_name: RwLock<String>,
    enabled: AtomicBool,
    port: u16,
    download_dir: PathBuf,
    stale_after: Duration,
    throttle: Throttle,
    key: SyncKey,
    directory: Arc<PeerDirectory>,
    transport: T,
    stores: Collaborators,
    state: Mutex<EngineState>,
}

impl<T: Transport> SyncEngine<T> {
    /// Wire up an engine.
    pub fn new(
        config: EngineConfig,
        key: SyncKey,
        directory: Arc<PeerDirectory>,
        transport: T,
        stores: Collaborators,
    ) -> Self {
        Self {
            device_name: RwLock::new(config.device_name),
            enabled: AtomicBool::new(config.enabled),
            port: config.port,
            download_dir: config.download_dir,
            stale_after: config.stale_after,
            throttle: config.throttle,
            key,
            directory,
            transport,
            stores,
            state: Mutex::new(EngineState {
                recent: RecentHashSet::default(),
                last_received: None,
                transfers: TransferTable::new(),
            }),
        }
    }

    /// Local device name.
    pub fn device_name(&self) -> String {
        self.device_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Change the origin name used on outgoing envelopes.
    pub fn set_device_name(&self, name: impl Into<String>) {
        *self.device_name.write().unwrap_or_else(|e| e.into_inner()) = name.into();
    }

    /// Turn sync on or off. When off, nothing is sent and inbound frames
    /// are acknowledged but not applied.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "sync toggled");
    }

    /// Whether sync is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The peer directory.
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Whether an incoming transfer is still open.
    pub async fn is_receiving(&self, file_id: &FileId) -> bool {
        self.state.lock().await.transfers.contains(file_id)
    }

    /// Number of open incoming transfers.
    pub async fn pending_transfers(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send a locally captured clipboard item to every authorized peer.
    pub async fn broadcast_clipboard_item(
        &self,
        entry: ClipboardEntry,
    ) -> Result<BroadcastReport, EngineError> {
        let hash = match entry.content_hash() {
            Some(hash) => Some(hash.clone()),
            None => hash_payload(entry.payload()).ok(),
        };
        self.broadcast_hashed(hash, Payload::Clipboard(entry)).await
    }

    /// Send the local snippet collection to every authorized peer.
    pub async fn broadcast_snippets(
        &self,
        collection: SnippetCollection,
    ) -> Result<BroadcastReport, EngineError> {
        let hash = collection.content_hash();
        self.broadcast_hashed(Some(hash), Payload::Snippets(collection))
            .await
    }

    async fn broadcast_hashed(
        &self,
        hash: Option<ContentHash>,
        payload: Payload,
    ) -> Result<BroadcastReport, EngineError> {
        if !self.is_enabled() {
            return Ok(BroadcastReport::suppressed(Suppressed::Disabled));
        }

        if let Some(hash) = &hash {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if state.last_received.as_ref() == Some(hash) {
                tracing::debug!(?hash, "not echoing content just received");
                return Ok(BroadcastReport::suppressed(Suppressed::LoopBack));
            }
            if state.recent.contains(hash, now) {
                tracing::debug!(?hash, "content already broadcast recently");
                return Ok(BroadcastReport::suppressed(Suppressed::Duplicate));
            }
            state.recent.insert(hash.clone(), now);
        } else {
            tracing::debug!("content not hashable, broadcasting without dedup");
        }

        let kind = payload.kind_name();
        let envelope = SyncEnvelope::new(self.device_name(), hash, payload);
        let report = self.fan_out(&envelope).await?;
        tracing::info!(
            kind,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast complete"
        );
        Ok(report)
    }

    /// Send a liveness ping to every authorized peer.
    pub async fn ping_peers(&self) -> Result<BroadcastReport, EngineError> {
        if !self.is_enabled() {
            return Ok(BroadcastReport::suppressed(Suppressed::Disabled));
        }
        let name = self.device_name();
        let envelope = SyncEnvelope::new(
            name.clone(),
            None,
            Payload::Ping(Ping { device_name: name }),
        );
        self.fan_out(&envelope).await
    }

    /// Greet a newly discovered peer, if it is authorized.
    ///
    /// Returns whether a handshake was delivered.
    pub async fn greet_peer(&self, name: &str) -> Result<bool, EngineError> {
        if !self.is_enabled() || !self.directory.is_authorized(name) {
            return Ok(false);
        }
        let Some(peer) = self.directory.get(name) else {
            return Ok(false);
        };
        let device_name = self.device_name();
        let envelope = SyncEnvelope::new(
            device_name.clone(),
            None,
            Payload::Handshake(Handshake {
                device_name,
                protocol_version: PROTOCOL_VERSION,
                port: self.port,
            }),
        );
        let plaintext = envelope.to_json()?;
        Ok(self.deliver(&peer, &plaintext).await?)
    }

    /// Send a file to every authorized peer.
    ///
    /// A header goes out first, then the chunks in order. Each peer gets
    /// chunk N+1 only after acknowledging chunk N; a peer that fails is
    /// dropped from the rest of the transfer.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<BroadcastReport, EngineError> {
        let path = path.as_ref();
        if !self.is_enabled() {
            return Ok(BroadcastReport::suppressed(Suppressed::Disabled));
        }
        let peers = self.directory.authorized_peers();
        if peers.is_empty() {
            tracing::debug!(path = %path.display(), "no authorized peers, not sending file");
            return Ok(BroadcastReport::default());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let file_size = tokio::fs::metadata(path)
            .await
            .map_err(|source| ContentError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let compressible = is_plausibly_text(&file_name, &read_head(path, SNIFF_LEN).await?);
        let mut reader = ChunkReader::open(path, chunk_size_for(file_size)).await?;

        let file_id = FileId::new();
        let origin = self.device_name();
        tracing::info!(
            file = %file_name,
            size = file_size,
            %file_id,
            peers = peers.len(),
            compressible,
            "sending file"
        );

        let mut active = peers;
        let mut failed = Vec::new();

        let header = SyncEnvelope::new(
            origin.clone(),
            None,
            Payload::FileHeader(FileHeader {
                file_id,
                file_name: file_name.clone(),
                file_size,
            }),
        );
        self.send_to_active(&header.to_json()?, &mut active, &mut failed)
            .await?;

        while !active.is_empty() {
            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            let raw_len = chunk.data.len();
            let compressed = if compressible && should_compress(&chunk.data) {
                compress(&chunk.data)
            } else {
                None
            };
            let (data, is_compressed, original_size) = match compressed {
                Some(bytes) => (bytes, true, Some(raw_len as u64)),
                None => (chunk.data, false, None),
            };

            let envelope = SyncEnvelope::new(
                origin.clone(),
                None,
                Payload::FileChunk(FileChunk {
                    file_id,
                    chunk_index: chunk.index,
                    data,
                    is_last: chunk.is_last,
                    is_compressed,
                    original_size,
                }),
            );
            self.send_to_active(&envelope.to_json()?, &mut active, &mut failed)
                .await?;

            if chunk.is_last {
                break;
            }
            let delay = self.throttle.delay_for(raw_len);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let delivered: Vec<String> = active.into_iter().map(|p| p.name).collect();
        if !delivered.is_empty() {
            self.stores
                .files
                .record_sent_file(&file_name, path, file_size, &delivered);
        }
        tracing::info!(
            file = %file_name,
            delivered = delivered.len(),
            failed = failed.len(),
            "file transfer finished"
        );
        Ok(BroadcastReport {
            delivered,
            failed,
            suppressed: None,
        })
    }

    async fn send_to_active(
        &self,
        plaintext: &[u8],
        active: &mut Vec<PeerIdentity>,
        failed: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let mut still_active = Vec::with_capacity(active.len());
        for peer in active.drain(..) {
            if self.deliver(&peer, plaintext).await? {
                still_active.push(peer);
            } else {
                failed.push(peer.name);
            }
        }
        *active = still_active;
        Ok(())
    }

    async fn fan_out(&self, envelope: &SyncEnvelope) -> Result<BroadcastReport, EngineError> {
        let plaintext = envelope.to_json()?;
        let mut report = BroadcastReport::default();
        for peer in self.directory.authorized_peers() {
            if self.deliver(&peer, &plaintext).await? {
                report.delivered.push(peer.name);
            } else {
                report.failed.push(peer.name);
            }
        }
        Ok(report)
    }

    /// Seal and send to one peer. `Ok(false)` means the peer was unreachable.
    async fn deliver(&self, peer: &PeerIdentity, plaintext: &[u8]) -> Result<bool, CryptoError> {
        let sealed = self.key.encrypt(plaintext)?;
        match self
            .transport
            .send(&peer.name, &peer.addresses, &sealed)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(peer = %peer.name, error = %e, "send failed");
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Process one inbound frame.
    ///
    /// Never fails: every problem is logged and reported as an outcome, and
    /// the transport acknowledges the frame the same way regardless.
    pub async fn handle_frame(&self, frame: &[u8]) -> InboundOutcome {
        let plaintext = match self.key.decrypt(frame) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!(error = %e, len = frame.len(), "dropping undecryptable frame");
                return InboundOutcome::Undecryptable;
            }
        };
        let envelope = match SyncEnvelope::from_json(&plaintext) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed envelope");
                return InboundOutcome::Malformed;
            }
        };
        if envelope.version != PROTOCOL_VERSION {
            let e = ProtocolError::UnsupportedVersion(envelope.version);
            tracing::warn!(origin = %envelope.origin, error = %e, "dropping envelope");
            return InboundOutcome::Malformed;
        }
        if !self.is_enabled() {
            tracing::debug!(origin = %envelope.origin, "sync disabled, ignoring envelope");
            return InboundOutcome::Disabled;
        }
        if !self.directory.is_authorized(&envelope.origin) {
            tracing::debug!(origin = %envelope.origin, "dropping envelope from unauthorized origin");
            return InboundOutcome::Unauthorized;
        }

        let SyncEnvelope {
            origin,
            content_hash,
            payload,
            ..
        } = envelope;
        tracing::debug!(%origin, kind = payload.kind_name(), "envelope received");

        match payload {
            Payload::Clipboard(entry) => {
                let recomputed = hash_payload(entry.payload());
                let hash = effective_hash(&origin, recomputed, content_hash);
                if !self.record_received(hash).await {
                    return InboundOutcome::Duplicate;
                }
                self.stores.clipboard.apply_remote_item(entry);
                InboundOutcome::Applied
            }
            Payload::Snippets(collection) => {
                let recomputed = Ok(collection.content_hash());
                let hash = effective_hash(&origin, recomputed, content_hash);
                if !self.record_received(hash).await {
                    return InboundOutcome::Duplicate;
                }
                self.stores.snippets.apply_remote_collection(collection);
                InboundOutcome::Applied
            }
            Payload::Ping(_) => {
                self.directory.touch(&origin, Instant::now());
                InboundOutcome::LivenessRefreshed
            }
            Payload::Handshake(handshake) => {
                if handshake.protocol_version != PROTOCOL_VERSION {
                    tracing::warn!(
                        %origin,
                        theirs = handshake.protocol_version,
                        ours = PROTOCOL_VERSION,
                        "peer speaks a different protocol version"
                    );
                }
                self.directory.touch(&origin, Instant::now());
                InboundOutcome::LivenessRefreshed
            }
            Payload::FileHeader(header) => self.open_transfer(&origin, header).await,
            Payload::FileChunk(chunk) => self.accept_chunk(&origin, chunk).await,
        }
    }

    /// Record an inbound hash. Returns `false` if it was already seen.
    async fn record_received(&self, hash: Option<ContentHash>) -> bool {
        let Some(hash) = hash else {
            return true;
        };
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if state.recent.contains(&hash, now) {
            tracing::debug!(?hash, "duplicate content dropped");
            return false;
        }
        state.recent.insert(hash.clone(), now);
        state.last_received = Some(hash);
        true
    }

    async fn open_transfer(&self, origin: &str, header: FileHeader) -> InboundOutcome {
        let file_name = match sanitize_file_name(&header.file_name) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(%origin, error = %e, "rejecting file header");
                return InboundOutcome::Rejected;
            }
        };

        let mut state = self.state.lock().await;
        if state.transfers.contains(&header.file_id) {
            let e = ProtocolError::from(TransferError::AlreadyInProgress(header.file_id));
            tracing::warn!(%origin, error = %e, "rejecting file header");
            return InboundOutcome::Rejected;
        }

        let destination = self.partial_path(&header.file_id);
        let sink = match FileSink::create(&destination).await {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(%origin, file = %file_name, error = %e, "cannot create destination");
                self.stores
                    .files
                    .record_failed_file(&file_name, origin, &e.to_string());
                return InboundOutcome::TransferFailed;
            }
        };

        match state.transfers.begin(
            header.file_id,
            file_name.clone(),
            header.file_size,
            origin.to_string(),
            destination,
            sink,
            Instant::now(),
        ) {
            Ok(()) => {
                tracing::info!(
                    %origin,
                    file = %file_name,
                    size = header.file_size,
                    file_id = %header.file_id,
                    "receiving file"
                );
                InboundOutcome::TransferOpened
            }
            Err(e) => {
                tracing::warn!(%origin, error = %e, "rejecting file header");
                InboundOutcome::Rejected
            }
        }
    }

    async fn accept_chunk(&self, origin: &str, chunk: FileChunk) -> InboundOutcome {
        let file_id = chunk.file_id;
        let chunk_index = chunk.chunk_index;
        let is_last = chunk.is_last;
        let data = match decode_chunk(chunk) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%origin, %file_id, chunk_index, error = %e, "dropping chunk");
                return InboundOutcome::Rejected;
            }
        };

        let mut state = self.state.lock().await;
        let written = match state.transfers.accept_chunk(
            file_id,
            origin,
            chunk_index,
            data.len() as u64,
            is_last,
            Instant::now(),
        ) {
            Err(e) => {
                let e = ProtocolError::from(e);
                tracing::warn!(%origin, chunk_index, error = %e, "dropping chunk");
                return InboundOutcome::Rejected;
            }
            Ok(ChunkDisposition::Completed(transfer)) => {
                return self.complete_transfer(transfer, &data).await;
            }
            Ok(ChunkDisposition::Receiving(transfer)) => transfer.sink.append(&data).await,
        };

        match written {
            Ok(()) => InboundOutcome::ChunkWritten,
            Err(e) => {
                if let Some(transfer) = state.transfers.abandon(&file_id) {
                    self.fail_transfer(transfer, &e.to_string()).await;
                }
                InboundOutcome::TransferFailed
            }
        }
    }

    async fn complete_transfer(
        &self,
        mut transfer: PendingFileTransfer<FileSink>,
        data: &[u8],
    ) -> InboundOutcome {
        if let Err(e) = transfer.sink.append(data).await {
            self.fail_transfer(transfer, &e.to_string()).await;
            return InboundOutcome::TransferFailed;
        }
        if transfer.bytes_written != transfer.total_size {
            tracing::warn!(
                file = %transfer.file_name,
                expected = transfer.total_size,
                received = transfer.bytes_written,
                "file size differs from header"
            );
        }

        let PendingFileTransfer {
            file_name,
            sender,
            destination,
            bytes_written,
            sink,
            ..
        } = transfer;
        let saved = match sink.finish().await {
            Ok(partial) => persist_unique(&partial, &self.download_dir, &file_name).await,
            Err(e) => Err(e),
        };
        match saved {
            Ok(path) => {
                tracing::info!(%sender, file = %file_name, path = %path.display(), size = bytes_written, "file received");
                self.stores
                    .files
                    .record_received_file(&file_name, &path, bytes_written, &sender);
                InboundOutcome::TransferCompleted
            }
            Err(e) => {
                tracing::warn!(%sender, file = %file_name, error = %e, "finalizing file failed");
                if let Err(e) = tokio::fs::remove_file(&destination).await {
                    tracing::debug!(path = %destination.display(), error = %e, "partial file not removed");
                }
                self.stores
                    .files
                    .record_failed_file(&file_name, &sender, &e.to_string());
                InboundOutcome::TransferFailed
            }
        }
    }

    /// Where an incoming transfer is written until its last chunk arrives.
    fn partial_path(&self, file_id: &FileId) -> PathBuf {
        self.download_dir.join(format!(".{file_id}.part"))
    }

    async fn fail_transfer(&self, transfer: PendingFileTransfer<FileSink>, reason: &str) {
        tracing::warn!(
            sender = %transfer.sender,
            file = %transfer.file_name,
            reason,
            "abandoning transfer"
        );
        let PendingFileTransfer {
            file_name,
            sender,
            sink,
            ..
        } = transfer;
        if let Err(e) = sink.discard().await {
            tracing::warn!(file = %file_name, error = %e, "could not remove partial file");
        }
        self.stores
            .files
            .record_failed_file(&file_name, &sender, reason);
    }

    /// Abandon incoming transfers idle longer than the stale timeout,
    /// deleting their partial files. Returns how many were abandoned.
    pub async fn sweep_stale_transfers(&self) -> usize {
        let stale = {
            let mut state = self.state.lock().await;
            state.transfers.sweep_stale(Instant::now(), self.stale_after)
        };
        let count = stale.len();
        for transfer in stale {
            self.fail_transfer(transfer, "transfer timed out").await;
        }
        count
    }
}

#[async_trait]
impl<T: Transport + 'static> FrameHandler for SyncEngine<T> {
    async fn handle_frame(&self, frame: Vec<u8>, remote: std::net::SocketAddr) {
        let outcome = SyncEngine::handle_frame(self, &frame).await;
        tracing::debug!(%remote, ?outcome, "frame handled");
    }
}

/// Pick the hash used for dedup: the recomputed one when available, the
/// sender's only as a fallback.
fn effective_hash(
    origin: &str,
    recomputed: Result<ContentHash, SyncError>,
    claimed: Option<ContentHash>,
) -> Option<ContentHash> {
    match (recomputed, claimed) {
        (Ok(ours), Some(theirs)) => {
            if ours != theirs {
                tracing::warn!(%origin, ?ours, ?theirs, "sender content hash mismatch");
            }
            Some(ours)
        }
        (Ok(ours), None) => Some(ours),
        (Err(_), claimed) => claimed,
    }
}

fn decode_chunk(chunk: FileChunk) -> Result<Vec<u8>, ProtocolError> {
    if !chunk.is_compressed {
        return Ok(chunk.data);
    }
    let original = chunk
        .original_size
        .ok_or(ProtocolError::MissingOriginalSize)?;
    if original > MAX_FRAME_SIZE as u64 {
        return Err(ProtocolError::ChunkTooLarge {
            size: original,
            limit: MAX_FRAME_SIZE,
        });
    }
    Ok(decompress(&chunk.data, original as usize)?)
}

/// Reduce a received file name to a bare final component.
pub fn sanitize_file_name(name: &str) -> Result<String, ProtocolError> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(ProtocolError::InvalidFileName(name.to_string()));
    }
    Ok(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SyncSecret;
    use crate::stores::testing::RecordingStore;
    use crate::transport::MockTransport;
    use std::net::SocketAddr;
    use sync_types::{hash_text, ClipboardPayload, Snippet, SnippetFolder};
    use tempfile::TempDir;

    fn key() -> SyncKey {
        SyncKey::from_secret(&SyncSecret::from_bytes([7; 32])).unwrap()
    }

    fn addr() -> SocketAddr {
        "192.168.1.20:5566".parse().unwrap()
    }

    struct Node {
        engine: SyncEngine<MockTransport>,
        transport: MockTransport,
        store: Arc<RecordingStore>,
        downloads: TempDir,
    }

    /// A node named `name` that trusts `allowed` and has discovered `discovered`.
    fn node(name: &str, allowed: &[&str], discovered: &[&str]) -> Node {
        let downloads = tempfile::tempdir().unwrap();
        let directory = Arc::new(PeerDirectory::with_allow_list(allowed.iter().copied()));
        for peer in discovered {
            directory.upsert(peer, vec![addr()], Instant::now());
        }
        let mut config = EngineConfig::new(name, downloads.path());
        config.throttle = Throttle::disabled();
        let transport = MockTransport::new();
        let store = Arc::new(RecordingStore::default());
        let engine = SyncEngine::new(
            config,
            key(),
            directory,
            transport.clone(),
            Collaborators::from_single(Arc::clone(&store)),
        );
        Node {
            engine,
            transport,
            store,
            downloads,
        }
    }

    fn seal(origin: &str, hash: Option<ContentHash>, payload: Payload) -> Vec<u8> {
        let envelope = SyncEnvelope::new(origin, hash, payload);
        key().encrypt(&envelope.to_json().unwrap()).unwrap()
    }

    fn open(frame: &[u8]) -> SyncEnvelope {
        SyncEnvelope::from_json(&key().decrypt(frame).unwrap()).unwrap()
    }

    fn text(s: &str) -> ClipboardEntry {
        ClipboardEntry::new(ClipboardPayload::Text(s.into()), None)
    }

    fn clipboard_frame(origin: &str, s: &str) -> Vec<u8> {
        let entry = text(s);
        let hash = entry.content_hash().cloned();
        seal(origin, hash, Payload::Clipboard(entry))
    }

    fn collection() -> SnippetCollection {
        SnippetCollection::new(vec![SnippetFolder {
            id: uuid::Uuid::new_v4(),
            title: "Replies".into(),
            is_enabled: true,
            snippets: vec![Snippet {
                id: uuid::Uuid::new_v4(),
                title: "Thanks".into(),
                content: "Thanks, will do.".into(),
            }],
        }])
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    #[tokio::test]
    async fn broadcast_reaches_only_authorized_discovered_peers() {
        let n = node("Desk", &["Laptop", "Phone"], &["Laptop", "Stranger"]);
        let report = n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();

        assert_eq!(report.delivered, vec!["Laptop".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(n.transport.send_count(), 1);
        assert!(n.transport.frames_to("Stranger").is_empty());

        let envelope = open(&n.transport.frames_to("Laptop")[0]);
        assert_eq!(envelope.origin, "Desk");
        assert_eq!(envelope.content_hash, Some(hash_text("hi")));
    }

    #[tokio::test]
    async fn repeated_broadcast_is_suppressed() {
        let n = node("Desk", &["Laptop"], &["Laptop"]);
        n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();
        let again = n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();

        assert_eq!(again.suppressed, Some(Suppressed::Duplicate));
        assert_eq!(n.transport.send_count(), 1);
    }

    #[tokio::test]
    async fn received_content_is_not_echoed_back() {
        let n = node("Desk", &["Laptop"], &["Laptop"]);
        let outcome = n.engine.handle_frame(&clipboard_frame("Laptop", "from laptop")).await;
        assert_eq!(outcome, InboundOutcome::Applied);

        // The clipboard monitor sees the applied item and offers it back.
        let report = n
            .engine
            .broadcast_clipboard_item(text("from laptop"))
            .await
            .unwrap();
        assert_eq!(report.suppressed, Some(Suppressed::LoopBack));
        assert_eq!(n.transport.send_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_block_others() {
        let n = node("Desk", &["Laptop", "Phone"], &["Laptop", "Phone"]);
        n.transport.set_unreachable("Laptop");

        let report = n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();
        assert_eq!(report.delivered, vec!["Phone".to_string()]);
        assert_eq!(report.failed, vec!["Laptop".to_string()]);
    }

    #[tokio::test]
    async fn disabled_engine_sends_and_applies_nothing() {
        let n = node("Desk", &["Laptop"], &["Laptop"]);
        n.engine.set_enabled(false);
        assert!(!n.engine.is_enabled());

        let report = n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();
        assert_eq!(report.suppressed, Some(Suppressed::Disabled));
        let outcome = n.engine.handle_frame(&clipboard_frame("Laptop", "x")).await;
        assert_eq!(outcome, InboundOutcome::Disabled);

        assert_eq!(n.transport.send_count(), 0);
        assert_eq!(n.store.item_count(), 0);
    }

    #[tokio::test]
    async fn snippets_are_broadcast_and_applied() {
        let sender = node("Desk", &["Laptop"], &["Laptop"]);
        let receiver = node("Laptop", &["Desk"], &["Desk"]);

        let report = sender.engine.broadcast_snippets(collection()).await.unwrap();
        assert_eq!(report.delivered.len(), 1);

        let frame = &sender.transport.frames_to("Laptop")[0];
        assert_eq!(receiver.engine.handle_frame(frame).await, InboundOutcome::Applied);
        assert_eq!(receiver.store.collections.lock().unwrap().len(), 1);

        // Same collection again is a duplicate.
        assert_eq!(receiver.engine.handle_frame(frame).await, InboundOutcome::Duplicate);
    }

    #[tokio::test]
    async fn device_name_change_applies_to_new_envelopes() {
        let n = node("Desk", &["Laptop"], &["Laptop"]);
        n.engine.set_device_name("Studio");
        n.engine.broadcast_clipboard_item(text("hi")).await.unwrap();

        assert_eq!(n.engine.device_name(), "Studio");
        assert_eq!(open(&n.transport.frames_to("Laptop")[0]).origin, "Studio");
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    #[tokio::test]
    async fn greet_only_authorized_discovered_peers() {
        let n = node("Desk", &["Laptop"], &["Laptop", "Stranger"]);
        assert!(n.engine.greet_peer("Laptop").await.unwrap());
        assert!(!n.engine.greet_peer("Stranger").await.unwrap());
        assert!(!n.engine.greet_peer("Ghost").await.unwrap());

        let frames = n.transport.frames_to("Laptop");
        assert_eq!(frames.len(), 1);
        match open(&frames[0]).payload {
            Payload::Handshake(h) => {
                assert_eq!(h.device_name, "Desk");
                assert_eq!(h.protocol_version, PROTOCOL_VERSION);
                assert_eq!(h.port, 5566);
            }
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_refreshes_sender_liveness() {
        let sender = node("Desk", &["Laptop"], &["Laptop"]);
        let receiver = node("Laptop", &["Desk"], &["Desk"]);
        let before = receiver.engine.directory().get("Desk").unwrap().last_seen;

        let report = sender.engine.ping_peers().await.unwrap();
        assert_eq!(report.delivered, vec!["Laptop".to_string()]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let frame = &sender.transport.frames_to("Laptop")[0];
        assert_eq!(
            receiver.engine.handle_frame(frame).await,
            InboundOutcome::LivenessRefreshed
        );
        assert!(receiver.engine.directory().get("Desk").unwrap().last_seen > before);
    }

    // =========================================================================
    // Inbound filtering
    // =========================================================================

    #[tokio::test]
    async fn line_ending_variants_are_applied_once() {
        let n = node("Desk", &["Laptop", "Phone"], &[]);
        let first = n.engine.handle_frame(&clipboard_frame("Laptop", "Hello\r\nWorld")).await;
        let second = n.engine.handle_frame(&clipboard_frame("Phone", "Hello\nWorld")).await;

        assert_eq!(first, InboundOutcome::Applied);
        assert_eq!(second, InboundOutcome::Duplicate);
        assert_eq!(n.store.item_count(), 1);
    }

    #[tokio::test]
    async fn unauthorized_origin_is_dropped() {
        let n = node("Desk", &["Laptop"], &[]);
        let outcome = n.engine.handle_frame(&clipboard_frame("Unknown", "hi")).await;
        assert_eq!(outcome, InboundOutcome::Unauthorized);
        assert_eq!(n.store.item_count(), 0);
    }

    #[tokio::test]
    async fn undecryptable_frames_are_dropped() {
        let n = node("Desk", &["Laptop"], &[]);
        assert_eq!(
            n.engine.handle_frame(b"not a sealed frame at all").await,
            InboundOutcome::Undecryptable
        );

        let other_key = SyncKey::from_secret(&SyncSecret::from_bytes([9; 32])).unwrap();
        let envelope = SyncEnvelope::new("Laptop", None, Payload::Clipboard(text("hi")));
        let foreign = other_key.encrypt(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(n.engine.handle_frame(&foreign).await, InboundOutcome::Undecryptable);
        assert_eq!(n.store.item_count(), 0);
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped() {
        let n = node("Desk", &["Laptop"], &[]);
        let frame = key().encrypt(b"{\"version\":1}").unwrap();
        assert_eq!(n.engine.handle_frame(&frame).await, InboundOutcome::Malformed);

        let mut envelope = SyncEnvelope::new("Laptop", None, Payload::Clipboard(text("hi")));
        envelope.version = PROTOCOL_VERSION + 1;
        let frame = key().encrypt(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(n.engine.handle_frame(&frame).await, InboundOutcome::Malformed);
    }

    #[tokio::test]
    async fn sender_hash_is_not_trusted() {
        let n = node("Desk", &["Laptop"], &[]);
        let spoofed = seal(
            "Laptop",
            Some(hash_text("something else")),
            Payload::Clipboard(text("real")),
        );
        assert_eq!(n.engine.handle_frame(&spoofed).await, InboundOutcome::Applied);

        // The honest hash of the same content is now known.
        let honest = clipboard_frame("Laptop", "real");
        assert_eq!(n.engine.handle_frame(&honest).await, InboundOutcome::Duplicate);

        // The spoofed value was never recorded.
        let other = clipboard_frame("Laptop", "something else");
        assert_eq!(n.engine.handle_frame(&other).await, InboundOutcome::Applied);
    }

    #[tokio::test]
    async fn loopback_acknowledges_but_ignores_unauthorized_origin() {
        use crate::transport::{InboundServer, TcpTransport};
        use sync_core::RestartPolicy;

        let downloads = tempfile::tempdir().unwrap();
        let receiver_store = Arc::new(RecordingStore::default());
        let receiver = Arc::new(SyncEngine::new(
            EngineConfig::new("Desk", downloads.path()),
            key(),
            Arc::new(PeerDirectory::with_allow_list(["Laptop"])),
            MockTransport::new(),
            Collaborators::from_single(Arc::clone(&receiver_store)),
        ));
        let server = InboundServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(2),
            RestartPolicy::immediate(0),
        )
        .await
        .unwrap();
        let local = server.local_addr().unwrap();
        let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        let server_task = tokio::spawn(server.run(Arc::clone(&receiver), shutdown_rx));

        let sender = |name: &str| {
            let directory = Arc::new(PeerDirectory::with_allow_list(["Desk"]));
            directory.upsert("Desk", vec![local], Instant::now());
            SyncEngine::new(
                EngineConfig::new(name, downloads.path()),
                key(),
                directory,
                TcpTransport::new(Duration::from_secs(2)),
                Collaborators::from_single(Arc::new(RecordingStore::default())),
            )
        };

        let stranger = sender("Unknown");
        let report = stranger.broadcast_clipboard_item(text("sneaky")).await.unwrap();
        assert_eq!(report.delivered, vec!["Desk".to_string()]);
        assert_eq!(receiver_store.item_count(), 0);

        let laptop = sender("Laptop");
        let report = laptop.broadcast_clipboard_item(text("hello")).await.unwrap();
        assert_eq!(report.delivered, vec!["Desk".to_string()]);
        assert_eq!(receiver_store.item_count(), 1);

        shutdown.send_replace(true);
        server_task.await.unwrap();
    }

    // =========================================================================
    // File transfer
    // =========================================================================

    async fn feed(receiver: &Node, frames: &[Vec<u8>]) -> Vec<InboundOutcome> {
        let mut outcomes = Vec::with_capacity(frames.len());
        for frame in frames {
            outcomes.push(receiver.engine.handle_frame(frame).await);
        }
        outcomes
    }

    #[tokio::test]
    async fn text_file_transfers_intact() {
        let sender = node("Laptop", &["Desk"], &["Desk"]);
        let receiver = node("Desk", &["Laptop"], &["Laptop"]);

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("notes.txt");
        let line = "the quick brown fox jumps over the lazy dog 0123456789\n";
        let mut content = line.repeat(3 * 1024 * 1024 / line.len() + 1).into_bytes();
        content.truncate(3 * 1024 * 1024);
        std::fs::write(&source, &content).unwrap();

        let report = sender.engine.send_file(&source).await.unwrap();
        assert_eq!(report.delivered, vec!["Desk".to_string()]);

        let frames = sender.transport.frames_to("Desk");
        assert_eq!(frames.len(), 7, "header plus six 512 KiB chunks");
        match open(&frames[1]).payload {
            Payload::FileChunk(chunk) => {
                assert!(chunk.is_compressed);
                assert_eq!(chunk.original_size, Some(512 * 1024));
            }
            other => panic!("expected chunk, got {other:?}"),
        }

        let outcomes = feed(&receiver, &frames).await;
        assert_eq!(outcomes[0], InboundOutcome::TransferOpened);
        assert!(outcomes[1..6].iter().all(|o| *o == InboundOutcome::ChunkWritten));
        assert_eq!(outcomes[6], InboundOutcome::TransferCompleted);

        let received = receiver.downloads.path().join("notes.txt");
        assert_eq!(std::fs::read(&received).unwrap(), content);
        assert_eq!(receiver.engine.pending_transfers().await, 0);

        let history = receiver.store.received.lock().unwrap().clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "notes.txt");
        assert_eq!(history[0].size, content.len() as u64);
        assert_eq!(history[0].sender, "Laptop");

        let sent = sender.store.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("notes.txt".to_string(), content.len() as u64, vec!["Desk".to_string()])]
        );
    }

    #[tokio::test]
    async fn binary_file_is_sent_uncompressed() {
        let sender = node("Laptop", &["Desk"], &["Desk"]);
        let receiver = node("Desk", &["Laptop"], &["Laptop"]);

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("photo.png");
        let content: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        sender.engine.send_file(&source).await.unwrap();
        let frames = sender.transport.frames_to("Desk");
        assert_eq!(frames.len(), 2);
        match open(&frames[1]).payload {
            Payload::FileChunk(chunk) => {
                assert!(!chunk.is_compressed);
                assert!(chunk.is_last);
            }
            other => panic!("expected chunk, got {other:?}"),
        }

        feed(&receiver, &frames).await;
        let received = receiver.downloads.path().join("photo.png");
        assert_eq!(std::fs::read(received).unwrap(), content);
    }

    #[tokio::test]
    async fn empty_file_is_one_empty_chunk() {
        let sender = node("Laptop", &["Desk"], &["Desk"]);
        let receiver = node("Desk", &["Laptop"], &["Laptop"]);

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("empty.txt");
        std::fs::write(&source, b"").unwrap();

        sender.engine.send_file(&source).await.unwrap();
        let frames = sender.transport.frames_to("Desk");
        assert_eq!(frames.len(), 2);

        let outcomes = feed(&receiver, &frames).await;
        assert_eq!(outcomes[1], InboundOutcome::TransferCompleted);
        let received = receiver.downloads.path().join("empty.txt");
        assert!(std::fs::read(received).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_peer_is_dropped_from_rest_of_transfer() {
        let sender = node("Laptop", &["Desk", "Phone"], &["Desk", "Phone"]);
        sender.transport.set_unreachable("Phone");

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("a.txt");
        std::fs::write(&source, b"hello").unwrap();

        let report = sender.engine.send_file(&source).await.unwrap();
        assert_eq!(report.delivered, vec!["Desk".to_string()]);
        assert_eq!(report.failed, vec!["Phone".to_string()]);
        assert_eq!(sender.transport.frames_to("Desk").len(), 2);
        assert_eq!(sender.store.sent.lock().unwrap()[0].2, vec!["Desk".to_string()]);
    }

    #[tokio::test]
    async fn missing_source_file_is_an_error() {
        let sender = node("Laptop", &["Desk"], &["Desk"]);
        let result = sender.engine.send_file("/definitely/not/here.txt").await;
        assert!(matches!(result, Err(EngineError::Content(_))));
        assert_eq!(sender.transport.send_count(), 0);
    }

    fn header(file_id: FileId, name: &str, size: u64) -> Vec<u8> {
        seal(
            "Laptop",
            None,
            Payload::FileHeader(FileHeader {
                file_id,
                file_name: name.into(),
                file_size: size,
            }),
        )
    }

    fn chunk(origin: &str, file_id: FileId, index: u64, data: &[u8], is_last: bool) -> Vec<u8> {
        seal(
            origin,
            None,
            Payload::FileChunk(FileChunk {
                file_id,
                chunk_index: index,
                data: data.to_vec(),
                is_last,
                is_compressed: false,
                original_size: None,
            }),
        )
    }

    #[tokio::test]
    async fn chunk_for_unknown_transfer_is_rejected() {
        let n = node("Desk", &["Laptop"], &[]);
        let outcome = n
            .engine
            .handle_frame(&chunk("Laptop", FileId::new(), 0, b"x", true))
            .await;
        assert_eq!(outcome, InboundOutcome::Rejected);
        assert!(n.store.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_rejected() {
        let n = node("Desk", &["Laptop"], &[]);
        let id = FileId::new();
        assert_eq!(
            n.engine.handle_frame(&header(id, "a.txt", 6)).await,
            InboundOutcome::TransferOpened
        );
        assert_eq!(
            n.engine.handle_frame(&chunk("Laptop", id, 1, b"abc", true)).await,
            InboundOutcome::Rejected
        );
        assert!(n.engine.is_receiving(&id).await);

        // The expected chunk is still accepted.
        assert_eq!(
            n.engine.handle_frame(&chunk("Laptop", id, 0, b"abc", false)).await,
            InboundOutcome::ChunkWritten
        );
    }

    #[tokio::test]
    async fn chunk_from_another_peer_is_rejected() {
        let n = node("Desk", &["Laptop", "Phone"], &[]);
        let id = FileId::new();
        n.engine.handle_frame(&header(id, "a.txt", 3)).await;
        assert_eq!(
            n.engine.handle_frame(&chunk("Phone", id, 0, b"abc", true)).await,
            InboundOutcome::Rejected
        );
        assert!(n.engine.is_receiving(&id).await);
    }

    #[tokio::test]
    async fn duplicate_header_is_rejected() {
        let n = node("Desk", &["Laptop"], &[]);
        let id = FileId::new();
        n.engine.handle_frame(&header(id, "a.txt", 3)).await;
        assert_eq!(
            n.engine.handle_frame(&header(id, "a.txt", 3)).await,
            InboundOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn compressed_chunk_without_size_is_rejected() {
        let n = node("Desk", &["Laptop"], &[]);
        let id = FileId::new();
        n.engine.handle_frame(&header(id, "a.txt", 3)).await;
        let frame = seal(
            "Laptop",
            None,
            Payload::FileChunk(FileChunk {
                file_id: id,
                chunk_index: 0,
                data: b"abc".to_vec(),
                is_last: true,
                is_compressed: true,
                original_size: None,
            }),
        );
        assert_eq!(n.engine.handle_frame(&frame).await, InboundOutcome::Rejected);
        assert!(n.engine.is_receiving(&id).await);
    }

    #[tokio::test]
    async fn stale_transfer_is_swept_and_partial_file_removed() {
        let downloads = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::new("Desk", downloads.path());
        config.stale_after = Duration::ZERO;
        let store = Arc::new(RecordingStore::default());
        let engine = SyncEngine::new(
            config,
            key(),
            Arc::new(PeerDirectory::with_allow_list(["Laptop"])),
            MockTransport::new(),
            Collaborators::from_single(Arc::clone(&store)),
        );

        let id = FileId::new();
        engine.handle_frame(&header(id, "big.iso", 100)).await;
        engine.handle_frame(&chunk("Laptop", id, 0, b"partial", false)).await;
        let partial = downloads.path().join(format!(".{id}.part"));
        assert!(partial.exists());
        assert!(!downloads.path().join("big.iso").exists());

        assert_eq!(engine.sweep_stale_transfers().await, 1);
        assert!(!partial.exists());
        assert!(!downloads.path().join("big.iso").exists());
        assert!(!engine.is_receiving(&id).await);

        let failed = store.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "big.iso");
        assert_eq!(failed[0].1, "Laptop");
    }

    #[tokio::test]
    async fn fresh_transfer_survives_sweep() {
        let n = node("Desk", &["Laptop"], &[]);
        let id = FileId::new();
        n.engine.handle_frame(&header(id, "a.txt", 3)).await;
        assert_eq!(n.engine.sweep_stale_transfers().await, 0);
        assert!(n.engine.is_receiving(&id).await);
    }

    #[tokio::test]
    async fn unwritable_destination_fails_transfer() {
        let scratch = tempfile::tempdir().unwrap();
        let not_a_dir = scratch.path().join("occupied");
        std::fs::write(&not_a_dir, b"file").unwrap();

        let mut config = EngineConfig::new("Desk", &not_a_dir);
        config.throttle = Throttle::disabled();
        let store = Arc::new(RecordingStore::default());
        let engine = SyncEngine::new(
            config,
            key(),
            Arc::new(PeerDirectory::with_allow_list(["Laptop"])),
            MockTransport::new(),
            Collaborators::from_single(Arc::clone(&store)),
        );

        let id = FileId::new();
        assert_eq!(
            engine.handle_frame(&header(id, "a.txt", 3)).await,
            InboundOutcome::TransferFailed
        );
        assert!(!engine.is_receiving(&id).await);
        assert_eq!(store.failed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn path_components_are_stripped_from_file_names() {
        let n = node("Desk", &["Laptop"], &[]);
        let id = FileId::new();
        n.engine.handle_frame(&header(id, "../../evil.txt", 2)).await;
        n.engine.handle_frame(&chunk("Laptop", id, 0, b"ok", true)).await;

        assert!(n.downloads.path().join("evil.txt").exists());
        let parent = n.downloads.path().parent().unwrap();
        assert!(!parent.join("evil.txt").exists());
    }

    #[tokio::test]
    async fn interleaved_transfers_with_same_name_stay_separate() {
        let n = node("Desk", &["Laptop"], &[]);
        let first = FileId::new();
        let second = FileId::new();

        let outcomes = feed(
            &n,
            &[
                header(first, "a.txt", 6),
                chunk("Laptop", first, 0, b"abc", false),
                header(second, "a.txt", 3),
                chunk("Laptop", second, 0, b"xyz", true),
                chunk("Laptop", first, 1, b"def", true),
            ],
        )
        .await;
        assert_eq!(outcomes[3], InboundOutcome::TransferCompleted);
        assert_eq!(outcomes[4], InboundOutcome::TransferCompleted);

        let received = n.store.received.lock().unwrap().clone();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].path, n.downloads.path().join("a.txt"));
        assert_eq!(received[1].path, n.downloads.path().join("a (1).txt"));
        assert_eq!(std::fs::read(&received[0].path).unwrap(), b"xyz");
        assert_eq!(std::fs::read(&received[1].path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn existing_file_is_not_overwritten() {
        let n = node("Desk", &["Laptop"], &[]);
        let existing = n.downloads.path().join("report.pdf");
        std::fs::write(&existing, b"local copy").unwrap();

        let id = FileId::new();
        n.engine.handle_frame(&header(id, "report.pdf", 6)).await;
        assert_eq!(std::fs::read(&existing).unwrap(), b"local copy");
        assert_eq!(
            n.engine.handle_frame(&chunk("Laptop", id, 0, b"remote", true)).await,
            InboundOutcome::TransferCompleted
        );

        assert_eq!(std::fs::read(&existing).unwrap(), b"local copy");
        let saved = n.downloads.path().join("report (1).pdf");
        assert_eq!(std::fs::read(&saved).unwrap(), b"remote");
        assert_eq!(n.store.received.lock().unwrap()[0].path, saved);
        assert!(!n.downloads.path().join(format!(".{id}.part")).exists());
    }

    #[tokio::test]
    async fn abandoned_transfer_leaves_finished_namesake_alone() {
        let n = node("Desk", &["Laptop"], &[]);
        let done = FileId::new();
        feed(
            &n,
            &[header(done, "a.txt", 2), chunk("Laptop", done, 0, b"ok", true)],
        )
        .await;

        let pending = FileId::new();
        n.engine.handle_frame(&header(pending, "a.txt", 10)).await;
        n.engine.handle_frame(&chunk("Laptop", pending, 0, b"x", false)).await;
        let abandoned = {
            let mut state = n.engine.state.lock().await;
            state.transfers.abandon(&pending)
        };
        n.engine.fail_transfer(abandoned.unwrap(), "test").await;

        assert_eq!(std::fs::read(n.downloads.path().join("a.txt")).unwrap(), b"ok");
    }

    #[test]
    fn file_name_sanitizing() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\a\\notes.txt").unwrap(), "notes.txt");
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }
}
