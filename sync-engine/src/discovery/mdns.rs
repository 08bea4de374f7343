//! mDNS / DNS-SD backend.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use sync_types::PROTOCOL_VERSION;
use tokio::sync::mpsc;

use super::{Advertisement, DiscoveryBackend, DiscoveryError, DiscoveryEvent};

/// DNS-SD service type for lanclip.
pub const SERVICE_TYPE: &str = "_clipboard-sync._tcp.local.";

/// TXT key carrying the exact device name.
pub const TXT_NAME_KEY: &str = "name";

/// TXT key carrying the protocol version.
pub const TXT_VERSION_KEY: &str = "v";

/// Discovery over multicast DNS.
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    registered: Mutex<Option<String>>,
}

impl MdnsBackend {
    /// Start the mDNS daemon.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        Ok(Self {
            daemon,
            registered: Mutex::new(None),
        })
    }

    fn registered(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for MdnsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsBackend")
            .field("registered", &*self.registered())
            .finish()
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn advertise(&self, ad: &Advertisement) -> Result<(), DiscoveryError> {
        let advertise_err = |reason: String| DiscoveryError::Advertise {
            name: ad.device_name.clone(),
            reason,
        };

        let instance = instance_label(&ad.device_name);
        let host = format!("{}.local.", host_label(&ad.device_name));
        let properties = HashMap::from([
            (TXT_NAME_KEY.to_string(), ad.device_name.clone()),
            (TXT_VERSION_KEY.to_string(), PROTOCOL_VERSION.to_string()),
        ]);

        let info = ServiceInfo::new(SERVICE_TYPE, &instance, &host, "", ad.port, properties)
            .map_err(|e| advertise_err(e.to_string()))?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| advertise_err(e.to_string()))?;
        *self.registered() = Some(fullname);
        Ok(())
    }

    fn withdraw(&self) -> Result<(), DiscoveryError> {
        if let Some(fullname) = self.registered().take() {
            self.daemon
                .unregister(&fullname)
                .map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        }
        Ok(())
    }

    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let events = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        let (tx, rx) = mpsc::channel(64);

        // The daemon's channel is blocking; forward from a blocking thread.
        tokio::task::spawn_blocking(move || {
            let mut names: HashMap<String, String> = HashMap::new();
            while let Ok(event) = events.recv() {
                let forwarded = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let fullname = info.get_fullname().to_string();
                        let name = info
                            .get_property_val_str(TXT_NAME_KEY)
                            .map(str::to_string)
                            .unwrap_or_else(|| instance_from_fullname(&fullname));
                        let port = info.get_port();
                        let addresses = info
                            .get_addresses()
                            .iter()
                            .map(|ip| SocketAddr::new(*ip, port))
                            .collect();
                        names.insert(fullname, name.clone());
                        Some(DiscoveryEvent::Resolved { name, addresses })
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => names
                        .remove(&fullname)
                        .map(|name| DiscoveryEvent::Lost { name }),
                    _ => None,
                };
                if let Some(event) = forwarded {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
            }
            tracing::debug!("mDNS browse ended");
        });
        Ok(rx)
    }

    fn shutdown(&self) -> Result<(), DiscoveryError> {
        self.daemon
            .shutdown()
            .map(|_| ())
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))
    }
}

/// DNS-SD instance label: dots would split the label, so they are replaced.
fn instance_label(device_name: &str) -> String {
    device_name.replace('.', "-")
}

/// Host label: ASCII alphanumerics and hyphens only.
fn host_label(device_name: &str) -> String {
    let label: String = device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "lanclip".to_string()
    } else {
        label.to_string()
    }
}

fn instance_from_fullname(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}
