//! Holzworth Device Detection Library
//!
//! This crate provides the transport layer below the session manager:
//!
//! - [`Transport`] / [`DeviceLink`]: object-safe async traits for listing
//!   attached instruments and exchanging framed messages with one of them
//! - [`PortScanner`]: USB serial port enumeration keyed by serial number
//! - [`SerialTransport`]: a [`Transport`] over USB serial ports
//! - [`DialectProber`]: HS9000 handshake with legacy fallback
//!
//! # Example
//!
//! ```rust,no_run
//! use holz_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! for device in scanner.holzworth_devices().unwrap() {
//!     println!("Found {} on {}", device.serial_number, device.port);
//! }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;
pub mod serial;
pub mod transport;

pub use error::{DetectError, TransportError};
pub use probe::{DialectProber, ProbeConfig, ProbeResult};
pub use scanner::{AttachedDevice, PortScanner, ScannerConfig, SerialPortInfo};
pub use serial::{SerialLink, SerialTransport};
pub use transport::{DeviceLink, Transport};
