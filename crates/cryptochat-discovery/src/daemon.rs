use std::net::SocketAddr;
use std::time::Duration;

use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent, ServiceInfo};
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};

/// A peer seen on the network during one browse window: its instance UUID,
/// the address it advertises, and the raw TXT records it published.
#[derive(Debug, Clone)]
pub(crate) struct Sighting {
    pub uuid: Uuid,
    pub addr: SocketAddr,
    pub txt: Vec<(String, String)>,
}

/// Wraps the single mdns-sd `ServiceDaemon` instance.
/// This is the ONLY file that imports mdns_sd types.
pub(crate) struct MdnsDaemon {
    inner: ServiceDaemon,
}

impl MdnsDaemon {
    pub fn new() -> Result<Self> {
        let inner = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Register an instance of the given service type on the network.
    ///
    /// TXT pairs are passed through as-is; repeated keys are allowed (one
    /// `room=<name>` record per joined room).
    pub fn register(
        &self,
        service_type: &str,
        instance: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<()> {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "localhost".into())
            .to_string_lossy()
            .to_string();
        let host = format!("{hostname}.local.");

        let properties: Vec<(&str, &str)> = txt
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let service_info = ServiceInfo::new(service_type, instance, &host, "", port, &properties[..])
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))?
            .enable_addr_auto();

        tracing::debug!(
            fullname = service_info.get_fullname(),
            port,
            records = txt.len(),
            "Registering with mdns-sd daemon"
        );

        self.inner
            .register(service_info)
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))
    }

    /// Unregister a previously registered instance.
    pub fn unregister(&self, service_type: &str, instance: &str) -> Result<()> {
        let fullname = format!("{instance}.{service_type}");

        let _receiver = self
            .inner
            .unregister(&fullname)
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))?;

        Ok(())
    }

    /// Browse for instances of a service type, collecting everything that
    /// resolves within `window`, then stop the browse.
    pub async fn browse_window(
        &self,
        service_type: &str,
        window: Duration,
    ) -> Result<Vec<Sighting>> {
        let receiver = self
            .inner
            .browse(service_type)
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + window;
        let mut sightings = Vec::new();

        loop {
            tokio::select! {
                event = receiver.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(resolved)) => {
                        if let Some(sighting) = resolved_to_sighting(&resolved.as_resolved_service()) {
                            sightings.push(sighting);
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        if let Err(e) = self.inner.stop_browse(service_type) {
            tracing::debug!(service_type, error = %e, "mDNS stop_browse failed");
        }

        Ok(sightings)
    }

    /// Shut down the mdns-sd daemon.
    pub fn shutdown(&self) -> Result<()> {
        let _receiver = self
            .inner
            .shutdown()
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        Ok(())
    }
}

/// Convert an mdns-sd resolution into a sighting.
/// This is the ONE place this conversion happens.
fn resolved_to_sighting(resolved: &ResolvedService) -> Option<Sighting> {
    let fullname = resolved.fullname.as_str();

    // Extract instance name: "<uuid>._cryptochat._tcp.local." -> "<uuid>"
    let instance = fullname.find("._").map(|i| &fullname[..i]).unwrap_or(fullname);

    let uuid = match Uuid::parse_str(instance) {
        Ok(uuid) => uuid,
        Err(_) => {
            tracing::debug!(instance, "Failed to parse discovered instance as UUID");
            return None;
        }
    };

    // Prefer first IPv4, fallback to first IPv6
    let addresses = &resolved.addresses;
    let ip = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let txt: Vec<(String, String)> = resolved
        .txt_properties
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    Some(Sighting {
        uuid,
        addr: SocketAddr::new(ip, resolved.port),
        txt,
    })
}
