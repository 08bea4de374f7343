//! # sync-engine
//!
//! Networked half of lanclip: peers find each other with mDNS, exchange
//! encrypted envelopes over TCP, and the [`SyncEngine`] decides what gets
//! sent and what gets applied.
//!
//! - [`crypto`] - passphrase-derived symmetric key, sealed frames
//! - [`discovery`] - LAN advertisement and browsing
//! - [`transport`] - length-prefixed frames with acknowledgement
//! - [`engine`] - fan-out, inbound filtering, file transfers
//! - [`stores`] - collaborator interfaces the engine applies results to

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod discovery;
pub mod engine;
pub mod stores;
pub mod transport;

pub use crypto::{CryptoError, KdfParams, SyncKey, SyncSecret};
pub use discovery::{
    Advertisement, Discovery, DiscoveryBackend, DiscoveryError, DiscoveryEvent, MdnsBackend,
    MockDiscoveryBackend,
};
pub use engine::{
    sanitize_file_name, BroadcastReport, EngineConfig, EngineError, InboundOutcome,
    ProtocolError, Suppressed, SyncEngine,
};
pub use stores::{ClipboardStore, Collaborators, FileHistoryStore, SnippetStore};
pub use transport::{
    FrameHandler, InboundServer, MockTransport, SentFrame, TcpTransport, Transport,
    TransportError, DEFAULT_ACK_TIMEOUT, MAX_FRAME_SIZE,
};
