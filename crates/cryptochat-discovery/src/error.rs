use thiserror::Error;

/// Domain-specific errors for the discovery engine.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
