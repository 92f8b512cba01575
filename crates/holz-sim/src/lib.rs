//! Holzworth Instrument Simulator
//!
//! Simulated HS9000 and legacy synthesizers behind an in-memory
//! [`SimTransport`], for exercising the session manager without hardware.
//!
//! # Example
//!
//! ```rust
//! use holz_sim::{SimTransport, SimulatedHs9000, SimulatedLegacy};
//!
//! let transport = SimTransport::new();
//! transport.attach(SimulatedLegacy::new("H1234"));
//! transport.attach(SimulatedHs9000::new("HS01"));
//! ```

pub mod hs9000;
pub mod legacy;
pub mod transport;

use holz_protocol::Dialect;

pub use hs9000::{SimulatedHs9000, SimulatedHs9000Config};
pub use legacy::SimulatedLegacy;
pub use transport::{DeviceFaults, SimLink, SimTransport};

/// Instrument-side behaviour of a simulated device
pub trait SimulatedInstrument: Send {
    /// Serial number the device enumerates with
    fn serial(&self) -> &str;

    /// Dialect the device speaks
    fn dialect(&self) -> Dialect;

    /// Handle one request frame; `None` means the device stays silent
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>>;
}
