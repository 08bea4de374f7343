//! Mock transport for testing.
//!
//! Captures sent frames for verification and can be told to fail.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A frame captured by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Peer the frame was addressed to
    pub peer: String,
    /// Addresses offered for the peer
    pub addresses: Vec<SocketAddr>,
    /// The sealed frame
    pub frame: Vec<u8>,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent: Vec<SentFrame>,
    unreachable: HashSet<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames that were delivered.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Frames delivered to one peer, in order.
    pub fn frames_to(&self, peer: &str) -> Vec<Vec<u8>> {
        self.lock()
            .sent
            .iter()
            .filter(|s| s.peer == peer)
            .map(|s| s.frame.clone())
            .collect()
    }

    /// Number of frames delivered.
    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Make every send to `peer` fail with a connect error.
    pub fn set_unreachable(&self, peer: &str) {
        self.lock().unreachable.insert(peer.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Clear all state.
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        peer: &str,
        addresses: &[SocketAddr],
        frame: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if inner.unreachable.contains(peer) {
            return Err(TransportError::Connect {
                peer: peer.to_string(),
                attempts: addresses.len(),
            });
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::Send(error));
        }

        inner.sent.push(SentFrame {
            peer: peer.to_string(),
            addresses: addresses.to_vec(),
            frame: frame.to_vec(),
        });
        Ok(())
    }
}
