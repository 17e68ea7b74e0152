use std::sync::Arc;

use cryptochat_crypto::Identity;
use cryptochat_discovery::DiscoveryCore;
use cryptochat_events::Broker;
use cryptochat_store::Store;

use crate::trust::TrustStore;

/// Long-lived node state handed to every request handler.
///
/// Everything is behind an `Arc` so the state clones freely into
/// per-connection tasks; there are no globals.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub identity: Arc<Identity>,
    pub trust: Arc<TrustStore>,
    pub discovery: Arc<DiscoveryCore>,
    pub events: Arc<Broker>,
}
