//! Holzworth Session Manager
//!
//! This crate provides the multi-device session layer for Holzworth RF
//! synthesizers. Devices are addressed by serial number and may speak either
//! the HS9000 ASCII dialect or the legacy fixed-parameter dialect.
//!
//! # Architecture
//!
//! - A registry tracks known serials in discovery order
//! - Each open device gets its own worker task owning the device link; commands
//!   to one device run strictly in arrival order, different devices run in
//!   parallel
//! - Timeouts and transport failures latch the device into a faulted state
//!   until it is re-opened
//! - Lifecycle and fault events are broadcast through [`SessionEvent`]
//!
//! # Example
//!
//! ```rust,no_run
//! use holz_detect::SerialTransport;
//! use holz_session::SessionManager;
//!
//! # async fn run() -> Result<(), holz_session::SessionError> {
//! let session = SessionManager::new(SerialTransport::new());
//! for serial in session.list_attached().await? {
//!     let handle = session.open(&serial).await?;
//!     println!("{} speaks the {} dialect", serial, handle.dialect());
//! }
//!
//! session.rf_power_on("H1234").await?;
//! session.set_frequency_str("H1234", "3 GHz").await?;
//! assert_eq!(session.read_frequency("H1234").await?, 3_000_000_000);
//!
//! session.close_all().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod hs9000;
pub mod logging;
pub mod registry;
pub mod session;

pub use channel::ChannelState;
pub use config::SessionConfig;
pub use error::{ConfigError, SessionError};
pub use events::SessionEvent;
pub use hs9000::Hs9000Channel;
pub use registry::{DeviceHandle, DeviceRecord, DeviceState};
pub use session::SessionManager;

pub use holz_protocol::hs9000::{Channel, Identity, Limit};
pub use holz_protocol::{Dialect, InstrumentScale, ModulationMode};
