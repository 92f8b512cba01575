//! Dialect probing
//!
//! Newer HS9000-series instruments answer the ASCII identification query
//! `:IDN?`; legacy synthesizers do not. The prober sends the query once and
//! falls back to the legacy dialect on silence, timeout, or any reply that
//! is not a Holzworth identification.

use std::time::Duration;

use holz_protocol::hs9000::{commands, Identity};
use holz_protocol::{codec_for, Dialect, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::transport::DeviceLink;

/// Result of probing a device link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Detected dialect
    pub dialect: Dialect,
    /// Identification (HS9000 only)
    pub identity: Option<Identity>,
}

impl ProbeResult {
    fn legacy() -> Self {
        Self {
            dialect: Dialect::Legacy,
            identity: None,
        }
    }
}

/// Configuration for probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for the HS9000 handshake
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
        }
    }
}

/// Dialect prober
#[derive(Debug, Clone, Default)]
pub struct DialectProber {
    config: ProbeConfig,
}

impl DialectProber {
    /// Create a new prober with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a prober with custom configuration
    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Determine the dialect spoken over `link`
    pub async fn probe(&self, serial: &str, link: &mut dyn DeviceLink) -> ProbeResult {
        match self.try_hs9000(serial, link).await {
            Some(identity) => {
                info!("Identified {} as {} (HS9000 dialect)", serial, identity.model);
                ProbeResult {
                    dialect: Dialect::Hs9000,
                    identity: Some(identity),
                }
            }
            None => {
                link.discard_pending();
                info!("No HS9000 handshake from {}, using legacy dialect", serial);
                ProbeResult::legacy()
            }
        }
    }

    async fn try_hs9000(&self, serial: &str, link: &mut dyn DeviceLink) -> Option<Identity> {
        let codec = codec_for(Dialect::Hs9000);
        let request = Request::Raw(commands::identify());
        let encoded = codec.encode(&request).ok()?;

        trace!("Sending HS9000 identification probe to {}", serial);
        if let Err(e) = link.write(&encoded.bytes).await {
            warn!("Failed to write identification probe to {}: {}", serial, e);
            return None;
        }

        let reply = match timeout(self.config.timeout, link.read(encoded.framing)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                debug!("Identification read from {} failed: {}", serial, e);
                return None;
            }
            Err(_) => {
                debug!("Identification probe to {} timed out", serial);
                return None;
            }
        };

        match codec.decode(&request, &reply) {
            Ok(Response::Text(text)) => {
                trace!("Identification reply from {}: {:?}", serial, text);
                Identity::parse(&text)
            }
            _ => None,
        }
    }
}
