//! Mock discovery backend for testing.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{Advertisement, DiscoveryBackend, DiscoveryError, DiscoveryEvent};

/// In-process discovery backend.
///
/// Records advertisements and lets tests inject network events with
/// [`emit`](Self::emit). Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MockDiscoveryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    advertised: Vec<Advertisement>,
    advertise_attempts: usize,
    fail_advertise: usize,
    fail_browse: bool,
    withdrawals: usize,
    events: Option<mpsc::Sender<DiscoveryEvent>>,
    shut_down: bool,
}

impl MockDiscoveryBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` advertise calls.
    pub fn fail_advertise(&self, count: usize) {
        self.lock().fail_advertise = count;
    }

    /// Fail every browse call.
    pub fn fail_browse(&self) {
        self.lock().fail_browse = true;
    }

    /// Inject an event as if it came from the network.
    ///
    /// Dropped silently when nothing is browsing.
    pub fn emit(&self, event: DiscoveryEvent) {
        if let Some(tx) = self.lock().events.as_ref() {
            let _ = tx.try_send(event);
        }
    }

    /// Successful advertisements, in order.
    pub fn advertised(&self) -> Vec<Advertisement> {
        self.lock().advertised.clone()
    }

    /// Advertise calls, successful or not.
    pub fn advertise_attempts(&self) -> usize {
        self.lock().advertise_attempts
    }

    /// Withdraw calls.
    pub fn withdraw_count(&self) -> usize {
        self.lock().withdrawals
    }

    /// Whether shutdown was called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DiscoveryBackend for MockDiscoveryBackend {
    fn advertise(&self, ad: &Advertisement) -> Result<(), DiscoveryError> {
        let mut inner = self.lock();
        inner.advertise_attempts += 1;
        if inner.fail_advertise > 0 {
            inner.fail_advertise -= 1;
            return Err(DiscoveryError::Advertise {
                name: ad.device_name.clone(),
                reason: "address already in use".into(),
            });
        }
        inner.advertised.push(ad.clone());
        Ok(())
    }

    fn withdraw(&self) -> Result<(), DiscoveryError> {
        self.lock().withdrawals += 1;
        Ok(())
    }

    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let mut inner = self.lock();
        if inner.fail_browse {
            return Err(DiscoveryError::Browse("multicast unavailable".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        inner.events = Some(tx);
        Ok(rx)
    }

    fn shutdown(&self) -> Result<(), DiscoveryError> {
        let mut inner = self.lock();
        inner.events = None;
        inner.shut_down = true;
        Ok(())
    }
}
