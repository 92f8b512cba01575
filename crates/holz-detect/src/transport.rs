//! Transport abstraction
//!
//! A [`Transport`] knows which instruments are physically attached and can
//! open a [`DeviceLink`] to one of them by serial number. The link is a
//! message-level byte pipe; the reply framing for every read is supplied by
//! the codec, so the link never needs to know which dialect it carries.

use async_trait::async_trait;
use holz_protocol::Framing;

use crate::error::TransportError;

/// Source of attached instruments
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serial numbers of currently attached instruments, in discovery order
    async fn attached(&self) -> Result<Vec<String>, TransportError>;

    /// Returns whether an instrument with this serial number is attached
    async fn is_attached(&self, serial: &str) -> Result<bool, TransportError> {
        Ok(self.attached().await?.iter().any(|s| s == serial))
    }

    /// Open a link to an attached instrument
    async fn open(&self, serial: &str) -> Result<Box<dyn DeviceLink>, TransportError>;
}

/// An open connection to one instrument
///
/// A link is owned by exactly one task at a time; it is never shared.
#[async_trait]
pub trait DeviceLink: Send {
    /// Write a complete request
    ///
    /// Implementations return [`TransportError::Busy`] only when nothing
    /// was written.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one reply delimited by `framing`
    async fn read(&mut self, framing: Framing) -> Result<Vec<u8>, TransportError>;

    /// Drop any partially received reply
    fn discard_pending(&mut self) {}

    /// Close the link
    async fn close(&mut self) -> Result<(), TransportError>;
}
